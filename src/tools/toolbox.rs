//! Default tool executor
//!
//! Web search and page fetch go over HTTP, file tools are confined to a
//! sandbox directory, code runs in a child process that dies with the
//! toolbox.

use super::{truncate_output, Notifier, ToolExecutor, ToolKind, ToolProvider, ToolRequest, ToolSpec};
use crate::error::SidekickError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    pub sandbox_dir: PathBuf,
    pub search_url: String,
    pub search_api_key: Option<String>,
    pub python: String,
    pub code_timeout: Duration,
    pub max_output_chars: usize,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: PathBuf::from("sandbox"),
            search_url: "https://google.serper.dev/search".to_string(),
            search_api_key: None,
            python: "python3".to_string(),
            code_timeout: Duration::from_secs(20),
            max_output_chars: 8000,
        }
    }
}

pub struct Toolbox {
    client: Client,
    config: ToolboxConfig,
    notifier: Arc<dyn Notifier>,
    closed: AtomicBool,
}

impl Toolbox {
    pub fn new(config: ToolboxConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            notifier,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn web_search(&self, query: &str) -> Result<String> {
        let api_key = self.config.search_api_key.as_deref().ok_or_else(|| {
            SidekickError::ToolFailure("web search is not configured (SEARCH_API_KEY)".to_string())
        })?;

        let response = self
            .client
            .post(&self.config.search_url)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query }))
            .send()
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SidekickError::ToolFailure(format!(
                "search API returned {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("invalid search response: {}", e)))?;

        Ok(format_search_results(&body))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SidekickError::InvalidToolInput(format!(
                "fetch_page needs an absolute http(s) URL, got {}",
                url
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("fetch failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SidekickError::ToolFailure(format!(
                "{} returned {}",
                url, status
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("unreadable body: {}", e)))?;

        Ok(strip_html(&html))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = resolve_sandbox_path(&self.config.sandbox_dir, path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("cannot read {}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<String> {
        let full = resolve_sandbox_path(&self.config.sandbox_dir, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| SidekickError::ToolFailure(format!("cannot write {}: {}", path, e)))?;

        Ok(format!("Wrote {} bytes to {}", contents.len(), path))
    }

    async fn run_python(&self, code: &str) -> Result<String> {
        let child = Command::new(&self.config.python)
            .arg("-c")
            .arg(code)
            .current_dir(&self.config.sandbox_dir)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.code_timeout, child)
            .await
            .map_err(|_| {
                SidekickError::ToolFailure(format!(
                    "code execution timed out after {}s",
                    self.config.code_timeout.as_secs()
                ))
            })?
            .map_err(|e| SidekickError::ToolFailure(format!("cannot start python: {}", e)))?;

        let mut result = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            result.push_str("\n[stderr]\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result.push_str(&format!("\n[exit status: {}]", output.status));
        }
        if result.trim().is_empty() {
            result = "(no output)".to_string();
        }
        Ok(result)
    }
}

#[async_trait]
impl ToolExecutor for Toolbox {
    fn specs(&self) -> Vec<ToolSpec> {
        ToolKind::ALL.into_iter().map(ToolKind::spec).collect()
    }

    async fn invoke(&self, request: ToolRequest) -> Result<String> {
        if self.is_closed() {
            return Err(SidekickError::ToolFailure("toolbox is closed".to_string()));
        }

        debug!(tool = request.kind().name(), "Invoking tool");

        let output = match &request {
            ToolRequest::WebSearch { query } => self.web_search(query).await?,
            ToolRequest::FetchPage { url } => self.fetch_page(url).await?,
            ToolRequest::ReadFile { path } => self.read_file(path).await?,
            ToolRequest::WriteFile { path, contents } => self.write_file(path, contents).await?,
            ToolRequest::RunPython { code } => self.run_python(code).await?,
            ToolRequest::SendNotification { message } => {
                self.notifier.notify(message).await?;
                "Notification sent".to_string()
            }
        };

        Ok(truncate_output(output, self.config.max_output_chars))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(sandbox = %self.config.sandbox_dir.display(), "Toolbox closed");
        }
        Ok(())
    }
}

impl Drop for Toolbox {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("Toolbox dropped without close");
        }
    }
}

/// Builds one `Toolbox` per session
pub struct ToolboxProvider {
    config: ToolboxConfig,
    notifier: Arc<dyn Notifier>,
}

impl ToolboxProvider {
    pub fn new(config: ToolboxConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self { config, notifier }
    }
}

#[async_trait]
impl ToolProvider for ToolboxProvider {
    async fn acquire(&self) -> Result<Arc<dyn ToolExecutor>> {
        tokio::fs::create_dir_all(&self.config.sandbox_dir).await?;
        let toolbox = Toolbox::new(self.config.clone(), self.notifier.clone())?;
        Ok(Arc::new(toolbox))
    }
}

/// Join a worker-supplied relative path onto the sandbox root.
/// Absolute paths and any `..` component are rejected.
fn resolve_sandbox_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path.trim());
    if relative.as_os_str().is_empty() {
        return Err(SidekickError::InvalidToolInput("empty path".to_string()));
    }

    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SidekickError::InvalidToolInput(format!(
                    "path must stay inside the sandbox: {}",
                    path
                )))
            }
        }
    }

    Ok(root.join(relative))
}

fn format_search_results(body: &Value) -> String {
    let mut out = String::new();

    if let Some(answer) = body
        .get("answerBox")
        .and_then(|a| a.get("answer").or_else(|| a.get("snippet")))
        .and_then(Value::as_str)
    {
        out.push_str(&format!("Answer: {}\n\n", answer));
    }

    let results = body
        .get("organic")
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default();

    for (i, item) in results.iter().take(MAX_SEARCH_RESULTS).enumerate() {
        let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("");
        out.push_str(&format!(
            "{}. {}\n{}\n{}\n\n",
            i + 1,
            field("title"),
            field("link"),
            field("snippet")
        ));
    }

    if out.is_empty() {
        "No results found.".to_string()
    } else {
        out.trim_end().to_string()
    }
}

/// Crude readable-text extraction: drop tags, scripts and styles, collapse
/// whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let lower = html.to_ascii_lowercase();
    let mut i = 0;

    while i < html.len() {
        if let Some(end) = skip_until {
            match lower[i..].find(end) {
                Some(pos) => {
                    i += pos + end.len();
                    skip_until = None;
                    continue;
                }
                None => break,
            }
        }

        let Some(c) = html[i..].chars().next() else {
            break;
        };

        if c == '<' {
            if lower[i..].starts_with("<script") {
                skip_until = Some("</script>");
            } else if lower[i..].starts_with("<style") {
                skip_until = Some("</style>");
            } else {
                in_tag = true;
            }
            text.push(' ');
        } else if c == '>' && in_tag {
            in_tag = false;
        } else if !in_tag {
            text.push(c);
        }
        i += c.len_utf8();
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::LogNotifier;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_config() -> ToolboxConfig {
        ToolboxConfig {
            sandbox_dir: std::env::temp_dir().join(format!("sidekick-test-{}", Uuid::new_v4())),
            ..ToolboxConfig::default()
        }
    }

    #[test]
    fn test_sandbox_path_rejects_escape() {
        let root = Path::new("/tmp/sandbox");
        assert!(resolve_sandbox_path(root, "notes/today.md").is_ok());
        assert!(resolve_sandbox_path(root, "../etc/passwd").is_err());
        assert!(resolve_sandbox_path(root, "/etc/passwd").is_err());
        assert!(resolve_sandbox_path(root, "a/../../b").is_err());
        assert!(resolve_sandbox_path(root, "  ").is_err());
    }

    #[tokio::test]
    async fn test_write_then_read_in_sandbox() {
        let config = temp_config();
        let root = config.sandbox_dir.clone();
        let provider = ToolboxProvider::new(config, Arc::new(LogNotifier));
        let toolbox = provider.acquire().await.unwrap();

        let written = toolbox
            .invoke(ToolRequest::WriteFile {
                path: "reports/summary.md".to_string(),
                contents: "# Summary".to_string(),
            })
            .await
            .unwrap();
        assert!(written.contains("9 bytes"));

        let read = toolbox
            .invoke(ToolRequest::ReadFile {
                path: "reports/summary.md".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(read, "# Summary");

        toolbox.close().await.unwrap();
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_closed_toolbox_rejects_calls() {
        let toolbox = Toolbox::new(temp_config(), Arc::new(LogNotifier)).unwrap();
        toolbox.close().await.unwrap();

        let result = toolbox
            .invoke(ToolRequest::SendNotification {
                message: "hello".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SidekickError::ToolFailure(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_search_fails() {
        let toolbox = Toolbox::new(temp_config(), Arc::new(LogNotifier)).unwrap();
        let result = toolbox
            .invoke(ToolRequest::WebSearch {
                query: "rust".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SidekickError::ToolFailure(_))));
        toolbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_rejects_relative_url() {
        let toolbox = Toolbox::new(temp_config(), Arc::new(LogNotifier)).unwrap();
        let result = toolbox
            .invoke(ToolRequest::FetchPage {
                url: "example.com".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SidekickError::InvalidToolInput(_))));
        toolbox.close().await.unwrap();
    }

    #[test]
    fn test_format_search_results() {
        let body = json!({
            "answerBox": {"answer": "42"},
            "organic": [
                {"title": "Rust", "link": "https://www.rust-lang.org", "snippet": "A language"}
            ]
        });
        let text = format_search_results(&body);
        assert!(text.starts_with("Answer: 42"));
        assert!(text.contains("1. Rust\nhttps://www.rust-lang.org\nA language"));
        assert_eq!(format_search_results(&json!({})), "No results found.");
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p{}</style><script>var x = '<p>';</script></head>\
                    <body><p>Hello</p>\n<p>world &amp; co</p></body></html>";
        assert_eq!(strip_html(html), "Hello world &amp; co");
    }

    #[tokio::test]
    async fn test_web_search_sends_key_and_formats_results() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "search-key"))
            .and(body_json(json!({"q": "tokio runtime"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Tokio", "link": "https://tokio.rs", "snippet": "An async runtime"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ToolboxConfig {
            search_url: format!("{}/search", server.uri()),
            search_api_key: Some("search-key".to_string()),
            ..temp_config()
        };
        let toolbox = Toolbox::new(config, Arc::new(LogNotifier)).unwrap();

        let text = toolbox
            .invoke(ToolRequest::WebSearch {
                query: "tokio runtime".to_string(),
            })
            .await
            .unwrap();
        assert!(text.contains("1. Tokio\nhttps://tokio.rs\nAn async runtime"));
        toolbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_web_search_error_status_is_tool_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let config = ToolboxConfig {
            search_url: server.uri(),
            search_api_key: Some("wrong".to_string()),
            ..temp_config()
        };
        let toolbox = Toolbox::new(config, Arc::new(LogNotifier)).unwrap();

        let result = toolbox
            .invoke(ToolRequest::WebSearch {
                query: "rust".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SidekickError::ToolFailure(msg)) if msg.contains("403")));
        toolbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_page_strips_markup() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><h1>Title</h1><p>Body text</p></body></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let toolbox = Toolbox::new(temp_config(), Arc::new(LogNotifier)).unwrap();

        let page = toolbox
            .invoke(ToolRequest::FetchPage {
                url: format!("{}/article", server.uri()),
            })
            .await
            .unwrap();
        assert_eq!(page, "Title Body text");

        let missing = toolbox
            .invoke(ToolRequest::FetchPage {
                url: format!("{}/missing", server.uri()),
            })
            .await;
        assert!(matches!(missing, Err(SidekickError::ToolFailure(msg)) if msg.contains("404")));
        toolbox.close().await.unwrap();
    }
}
