//! Environment configuration
//!
//! `AppConfig::from_env` loads `.env` (if present) and reads every knob
//! from the process environment. Values that are set but unparseable are
//! errors; unset values take their defaults.

use crate::agent::LoopConfig;
use crate::completion::{CompletionService, GeminiClient, ScriptedCompletion};
use crate::error::SidekickError;
use crate::models::Completion;
use crate::tools::{LogNotifier, Notifier, PushoverNotifier, ToolboxConfig};
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SEARCH_URL: &str = "https://google.serper.dev/search";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub max_rounds: u32,
    pub max_tool_calls_per_turn: u32,
    pub context_tokens: usize,
    pub sandbox_dir: PathBuf,
    pub code_timeout: Duration,
    pub max_tool_output_chars: usize,
    pub search_url: String,
    pub search_api_key: Option<String>,
    pub pushover_token: Option<String>,
    pub pushover_user: Option<String>,
    pub research_searches: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let loop_config = LoopConfig::default();
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            max_rounds: loop_config.max_rounds,
            max_tool_calls_per_turn: loop_config.max_tool_calls_per_turn,
            context_tokens: loop_config.context_tokens,
            sandbox_dir: PathBuf::from("sandbox"),
            code_timeout: Duration::from_secs(20),
            max_tool_output_chars: 8000,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            search_api_key: None,
            pushover_token: None,
            pushover_user: None,
            research_searches: 3,
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            max_rounds: parse_or(&get, "SIDEKICK_MAX_ROUNDS", defaults.max_rounds)?,
            max_tool_calls_per_turn: parse_or(
                &get,
                "SIDEKICK_MAX_TOOL_CALLS",
                defaults.max_tool_calls_per_turn,
            )?,
            context_tokens: parse_or(&get, "SIDEKICK_CONTEXT_TOKENS", defaults.context_tokens)?,
            sandbox_dir: get("SIDEKICK_SANDBOX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.sandbox_dir),
            code_timeout: Duration::from_secs(parse_or(
                &get,
                "SIDEKICK_CODE_TIMEOUT_SECS",
                defaults.code_timeout.as_secs(),
            )?),
            max_tool_output_chars: parse_or(
                &get,
                "SIDEKICK_TOOL_OUTPUT_CHARS",
                defaults.max_tool_output_chars,
            )?,
            search_url: get("SEARCH_API_URL").unwrap_or(defaults.search_url),
            search_api_key: get("SEARCH_API_KEY"),
            pushover_token: get("PUSHOVER_TOKEN"),
            pushover_user: get("PUSHOVER_USER"),
            research_searches: parse_or(&get, "RESEARCH_SEARCHES", defaults.research_searches)?,
            port: match get("PORT") {
                Some(_) => parse_or(&get, "PORT", defaults.port)?,
                None => parse_or(&get, "API_PORT", defaults.port)?,
            },
        };

        if config.max_rounds == 0 {
            return Err(SidekickError::ConfigError(
                "SIDEKICK_MAX_ROUNDS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_rounds: self.max_rounds,
            max_tool_calls_per_turn: self.max_tool_calls_per_turn,
            context_tokens: self.context_tokens,
        }
    }

    pub fn toolbox_config(&self) -> ToolboxConfig {
        ToolboxConfig {
            sandbox_dir: self.sandbox_dir.clone(),
            search_url: self.search_url.clone(),
            search_api_key: self.search_api_key.clone(),
            code_timeout: self.code_timeout,
            max_output_chars: self.max_tool_output_chars,
            ..ToolboxConfig::default()
        }
    }

    /// Token and user, when both are configured
    pub fn pushover(&self) -> Option<(String, String)> {
        Some((self.pushover_token.clone()?, self.pushover_user.clone()?))
    }

    /// Gemini when a key is set, otherwise a short canned script
    pub fn completion_service(&self) -> Result<Arc<dyn CompletionService>> {
        match &self.gemini_api_key {
            Some(key) => Ok(Arc::new(GeminiClient::new(
                key.clone(),
                self.gemini_model.clone(),
            )?)),
            None => {
                warn!("GEMINI_API_KEY not set - using scripted completions");
                Ok(Arc::new(ScriptedCompletion::new(demo_script())))
            }
        }
    }

    pub fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        match self.pushover() {
            Some((token, user)) => Ok(Arc::new(PushoverNotifier::new(token, user)?)),
            None => Ok(Arc::new(LogNotifier)),
        }
    }
}

/// One worker answer followed by an approving verdict
fn demo_script() -> Vec<Completion> {
    vec![
        Completion::text(
            "No completion service is configured, so this is a canned answer. \
             Set GEMINI_API_KEY to get real answers.",
        ),
        Completion::text(
            r#"{"feedback": "Canned answer accepted.", "success_criteria_met": true, "user_input_needed": false}"#,
        ),
    ]
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SidekickError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
