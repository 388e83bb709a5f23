//! Tool set available to the worker
//!
//! The set is closed: every tool is a `ToolKind` with a JSON-schema
//! descriptor, and a worker's tool call is decoded into a typed
//! `ToolRequest` before anything runs.

use crate::error::SidekickError;
use crate::models::ToolCall;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub mod notify;
pub mod toolbox;

pub use notify::{LogNotifier, Notifier, PushoverNotifier};
pub use toolbox::{Toolbox, ToolboxConfig, ToolboxProvider};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    FetchPage,
    ReadFile,
    WriteFile,
    RunPython,
    SendNotification,
}

/// Descriptor handed to the completion service
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::WebSearch,
        ToolKind::FetchPage,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::RunPython,
        ToolKind::SendNotification,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::FetchPage => "fetch_page",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::RunPython => "run_python",
            ToolKind::SendNotification => "send_notification",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::WebSearch => "Search the web and return the top results with links",
            ToolKind::FetchPage => "Fetch a web page and return its readable text",
            ToolKind::ReadFile => "Read a text file from the sandbox directory",
            ToolKind::WriteFile => "Write a text file into the sandbox directory",
            ToolKind::RunPython => {
                "Run a Python snippet; print() anything you want to see in the result"
            }
            ToolKind::SendNotification => "Send a push notification to the user",
        }
    }

    fn parameters(self) -> Value {
        let string_params = |fields: &[(&str, &str)]| {
            let properties: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(name, desc)| {
                    (
                        name.to_string(),
                        json!({ "type": "string", "description": desc }),
                    )
                })
                .collect();
            let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
            json!({ "type": "object", "properties": properties, "required": required })
        };

        match self {
            ToolKind::WebSearch => string_params(&[("query", "Search terms")]),
            ToolKind::FetchPage => string_params(&[("url", "Absolute http(s) URL")]),
            ToolKind::ReadFile => string_params(&[("path", "Path relative to the sandbox")]),
            ToolKind::WriteFile => string_params(&[
                ("path", "Path relative to the sandbox"),
                ("contents", "Full file contents"),
            ]),
            ToolKind::RunPython => string_params(&[("code", "Python source to execute")]),
            ToolKind::SendNotification => string_params(&[("message", "Notification text")]),
        }
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            name: self.name(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// Typed tool invocation, decoded from the worker's `{name, arguments}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    WebSearch { query: String },
    FetchPage { url: String },
    ReadFile { path: String },
    WriteFile { path: String, contents: String },
    RunPython { code: String },
    SendNotification { message: String },
}

impl ToolRequest {
    pub fn from_call(call: &ToolCall) -> Result<Self> {
        let kind = ToolKind::from_name(&call.name)
            .ok_or_else(|| SidekickError::ToolNotFound(call.name.clone()))?;

        let arguments = if call.arguments.is_null() {
            json!({})
        } else {
            call.arguments.clone()
        };

        serde_json::from_value(json!({ "name": kind.name(), "arguments": arguments })).map_err(
            |e| SidekickError::InvalidToolInput(format!("{}: {}", kind.name(), e)),
        )
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::WebSearch { .. } => ToolKind::WebSearch,
            ToolRequest::FetchPage { .. } => ToolKind::FetchPage,
            ToolRequest::ReadFile { .. } => ToolKind::ReadFile,
            ToolRequest::WriteFile { .. } => ToolKind::WriteFile,
            ToolRequest::RunPython { .. } => ToolKind::RunPython,
            ToolRequest::SendNotification { .. } => ToolKind::SendNotification,
        }
    }
}

/// Runs decoded tool requests for one session.
///
/// An executor may hold external resources; `close` releases them and
/// every later `invoke` must fail.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn specs(&self) -> Vec<ToolSpec>;

    async fn invoke(&self, request: ToolRequest) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// Hands out a fresh executor per session
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn ToolExecutor>>;
}

/// Cut text to at most `max_chars` characters
pub(crate) fn truncate_output(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
        text.push_str("\n[output truncated]");
    }
    text
}
