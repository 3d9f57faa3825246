//! Client boundary for a headless rendering service.
//!
//! Browser-mode jobs drive a [`BrowserPage`] and never talk to the rendering
//! service directly. [`HeadlessClient`] implements the boundary against a
//! browserless-style HTTP API; tests substitute their own page fakes.

pub mod error;

pub use error::{HeadlessError, Result};

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// One rendered page session. A page is never shared concurrently; the worker
/// pool recycles pages after a bounded number of actions.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate to a URL and wait for DOM content.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Wait up to `timeout_ms` for a CSS selector to appear. Returns whether
    /// it did; absence is not an error.
    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> Result<bool>;

    /// Evaluate a JavaScript expression in the page and return its JSON value.
    async fn evaluate_script(&mut self, script: &str) -> Result<Value>;

    /// The full rendered HTML of the current page.
    async fn content(&mut self) -> Result<String>;

    /// URLs of frames attached to the page (the main frame first).
    async fn frames(&mut self) -> Result<Vec<String>>;

    /// The page's current URL.
    fn url(&self) -> String;
}

/// Factory for page sessions; the scheduler's browser pool holds one.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation against a browserless-style service
// ---------------------------------------------------------------------------

pub struct HeadlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HeadlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl BrowserDriver for HeadlessClient {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        Ok(Box::new(RemotePage {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            current_url: Mutex::new(String::new()),
        }))
    }
}

/// A page backed by the rendering service. The service renders per request,
/// so the page tracks the current URL and replays it for each action.
pub struct RemotePage {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    current_url: Mutex<String>,
}

impl RemotePage {
    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    async fn post(&self, path: &str, body: Value) -> Result<String> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HeadlessError::Api { status: status.as_u16(), message });
        }

        Ok(resp.text().await?)
    }

    fn set_url(&self, url: &str) {
        *self.current_url.lock().expect("url lock poisoned") = url.to_string();
    }
}

#[async_trait]
impl BrowserPage for RemotePage {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        // /content validates the target renders; the body is re-fetched by
        // content() and evaluate_script() as needed.
        self.post("/content", serde_json::json!({ "url": url })).await?;
        self.set_url(url);
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let url = self.url();
        let script = format!(
            r#"(() => {{
                const deadline = Date.now() + {timeout_ms};
                return !!document.querySelector({selector:?}) || (() => {{
                    while (Date.now() < deadline) {{
                        if (document.querySelector({selector:?})) return true;
                    }}
                    return false;
                }})();
            }})()"#
        );
        let body = serde_json::json!({
            "url": url,
            "code": format!("export default async function ({{ page }}) {{ return page.evaluate({script:?}); }}"),
        });
        let raw = self.post("/function", body).await?;
        let value: Value = serde_json::from_str(&raw).unwrap_or(Value::Bool(false));
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn evaluate_script(&mut self, script: &str) -> Result<Value> {
        let url = self.url();
        let body = serde_json::json!({
            "url": url,
            "code": format!("export default async function ({{ page }}) {{ return page.evaluate({script:?}); }}"),
        });
        let raw = self.post("/function", body).await?;
        serde_json::from_str(&raw).map_err(|e| HeadlessError::Evaluate(e.to_string()))
    }

    async fn content(&mut self) -> Result<String> {
        let url = self.url();
        self.post("/content", serde_json::json!({ "url": url })).await
    }

    async fn frames(&mut self) -> Result<Vec<String>> {
        let value = self
            .evaluate_script("Array.from(document.querySelectorAll('iframe')).map(f => f.src)")
            .await?;
        Ok(value
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    fn url(&self) -> String {
        self.current_url.lock().expect("url lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_page_starts_blank() {
        let client = HeadlessClient::new("http://localhost:3000/", None);
        let page = client.open_page().await.expect("page");
        assert_eq!(page.url(), "");
    }

    #[test]
    fn endpoint_appends_token() {
        let client = HeadlessClient::new("http://host:3000", Some("secret"));
        assert_eq!(client.endpoint("/content"), "http://host:3000/content?token=secret");
        let bare = HeadlessClient::new("http://host:3000/", None);
        assert_eq!(bare.endpoint("/content"), "http://host:3000/content");
    }
}
