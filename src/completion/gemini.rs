//! Gemini API client
//!
//! Maps the transcript onto Gemini `contents`, advertises tools as
//! function declarations and turns the first candidate back into a
//! `Completion`. Uses a long-lived reqwest::Client for connection pooling.

use super::{CompletionRequest, CompletionService};
use crate::error::SidekickError;
use crate::models::{Completion, Message, Role, ToolCall};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at another models endpoint (proxy or mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        if self.api_key.is_empty() {
            return Err(SidekickError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let body = build_request(&request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                SidekickError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(SidekickError::LlmError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            SidekickError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        parse_response(gemini_response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn build_request(request: &CompletionRequest<'_>) -> GeminiRequest {
    let contents = request.messages.iter().map(to_content).collect();

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: request
                .tools
                .iter()
                .map(|spec| FunctionDeclaration {
                    name: spec.name.to_string(),
                    description: spec.description.to_string(),
                    parameters: spec.parameters.clone(),
                })
                .collect(),
        }]
    };

    GeminiRequest {
        contents,
        tools,
        generation_config: GenerationConfig {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
        },
        system_instruction: SystemInstruction {
            parts: vec![Part::text(request.system)],
        },
    }
}

fn to_content(message: &Message) -> Content {
    match (message.role, &message.tool_call) {
        (Role::Worker, Some(call)) => Content {
            role: "model".to_string(),
            parts: vec![Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Part::default()
            }],
        },
        (Role::Worker, None) => Content {
            role: "model".to_string(),
            parts: vec![Part::text(&message.content)],
        },
        (Role::Tool, Some(call)) => Content {
            role: "user".to_string(),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: call.name.clone(),
                    response: serde_json::json!({ "content": message.content }),
                }),
                ..Part::default()
            }],
        },
        (Role::Tool, None) => Content {
            role: "user".to_string(),
            parts: vec![Part::text(&format!("Tool result: {}", message.content))],
        },
        (Role::Evaluator, _) => Content {
            role: "user".to_string(),
            parts: vec![Part::text(&format!(
                "Evaluator feedback on your last answer: {}",
                message.content
            ))],
        },
        (Role::User, _) => Content {
            role: "user".to_string(),
            parts: vec![Part::text(&message.content)],
        },
    }
}

fn parse_response(response: GeminiResponse) -> Result<Completion> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| SidekickError::LlmError("No response from Gemini API".to_string()))?;

    debug!(finish_reason = ?candidate.finish_reason, "Gemini response received");

    let mut text = String::new();
    for part in candidate.content.parts {
        if let Some(call) = part.function_call {
            return Ok(Completion::ToolCall(ToolCall {
                name: call.name,
                arguments: call.args,
            }));
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    if text.trim().is_empty() {
        return Err(SidekickError::LlmError(
            "Empty response from Gemini".to_string(),
        ));
    }

    Ok(Completion::Text { text })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}
