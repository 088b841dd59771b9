//! Provider clients behind a single `invoke(model_id, prompt, timeout)` seam.
//!
//! Every backend normalizes its reply into a [`ProviderReply`] carrying the
//! HTTP status and an OpenAI-style chat completion body, so the router only
//! has to understand one shape.

use crate::router::catalog::MAX_OUTPUT_TOKENS;
use crate::utils::BoxError;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub const HUGGINGFACE_API_URL: &str = "https://router.huggingface.co/v1";
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
pub const POLLINATIONS_API_URL: &str = "https://text.pollinations.ai";

/// Raw outcome of one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

impl ProviderReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Wrap plain text in a chat completion body.
    pub fn from_text(text: &str) -> Self {
        Self::ok(json!({ "choices": [{ "message": { "content": text } }] }).to_string())
    }
}

/// A language-model backend reachable over HTTP.
///
/// Implementations return `Err` only for transport problems (connect
/// failures, timeouts); HTTP error statuses are reported in the reply.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderReply, BoxError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pull the first choice's message text out of a chat completion body.
///
/// Returns `None` for malformed bodies and for empty content.
pub fn parse_chat_body(body: &str) -> Option<String> {
    let completion: ChatCompletion = serde_json::from_str(body).ok()?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// OpenAI-compatible `POST /chat/completions` client with bearer auth.
///
/// Serves both the HuggingFace router and OpenRouter.
pub struct ChatCompletionsClient {
    provider: String,
    base_url: String,
    api_key: String,
    app_name: Option<String>,
    site_url: Option<String>,
    http: reqwest::Client,
}

impl fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChatCompletionsClient {
    pub fn new(provider: &str, base_url: &str, api_key: &str) -> Self {
        Self {
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            app_name: None,
            site_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn huggingface(token: &str) -> Self {
        Self::new("huggingface", HUGGINGFACE_API_URL, token)
    }

    pub fn openrouter(api_key: &str) -> Self {
        Self::new("openrouter", OPENROUTER_API_URL, api_key)
            .with_app_name("The Daily Token")
            .with_site_url("https://daily-tokens.netlify.app")
    }

    pub fn with_app_name(mut self, name: &str) -> Self {
        self.app_name = Some(name.to_string());
        self
    }

    pub fn with_site_url(mut self, url: &str) -> Self {
        self.site_url = Some(url.to_string());
        self
    }

    fn headers(&self) -> Result<HeaderMap, BoxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref url) = self.site_url {
            if let Ok(val) = HeaderValue::from_str(url) {
                headers.insert("HTTP-Referer", val);
            }
        }
        if let Some(ref name) = self.app_name {
            if let Ok(val) = HeaderValue::from_str(name) {
                headers.insert("X-Title", val);
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl ProviderClient for ChatCompletionsClient {
    #[instrument(level = "debug", skip_all, fields(provider = %self.provider, %model_id))]
    async fn invoke(
        &self,
        model_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderReply, BoxError> {
        let t0 = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
            .timeout(timeout)
            .json(&json!({
                "model": model_id,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 0.7,
                "max_tokens": MAX_OUTPUT_TOKENS,
            }))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Provider replied"
        );
        Ok(ProviderReply { status, body })
    }
}

/// Credential-free text endpoint used as the last resort after a chain fails.
///
/// Replies are plain text; they are wrapped into a chat completion body
/// unless the service already returned one.
pub struct PollinationsClient {
    base_url: String,
    http: reqwest::Client,
}

impl fmt::Debug for PollinationsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollinationsClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for PollinationsClient {
    fn default() -> Self {
        Self::new(POLLINATIONS_API_URL)
    }
}

impl PollinationsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

/// Normalize a Pollinations body into the chat completion shape.
fn normalize_text_reply(status: u16, body: String) -> ProviderReply {
    if status != 200 || parse_chat_body(&body).is_some() {
        return ProviderReply { status, body };
    }
    let text = body.trim();
    if text.is_empty() {
        return ProviderReply { status, body };
    }
    ProviderReply::from_text(text)
}

#[async_trait]
impl ProviderClient for PollinationsClient {
    #[instrument(level = "debug", skip_all, fields(%model_id))]
    async fn invoke(
        &self,
        model_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderReply, BoxError> {
        let url = format!(
            "{}/{}?model={}",
            self.base_url,
            urlencoding::encode(prompt),
            urlencoding::encode(model_id)
        );
        let response = self.http.get(url).timeout(timeout).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(normalize_text_reply(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  hi there \n"}}]}"#;
        assert_eq!(parse_chat_body(body), Some("hi there".to_string()));
    }

    #[test]
    fn test_parse_chat_body_rejects_empty_and_malformed() {
        assert_eq!(parse_chat_body(r#"{"choices":[]}"#), None);
        assert_eq!(
            parse_chat_body(r#"{"choices":[{"message":{"content":"   "}}]}"#),
            None
        );
        assert_eq!(
            parse_chat_body(r#"{"choices":[{"message":{"content":null}}]}"#),
            None
        );
        assert_eq!(parse_chat_body("<html>bad gateway</html>"), None);
    }

    #[test]
    fn test_from_text_round_trips_through_parser() {
        let reply = ProviderReply::from_text("3 | 0.8");
        assert_eq!(reply.status, 200);
        assert_eq!(parse_chat_body(&reply.body), Some("3 | 0.8".to_string()));
    }

    #[test]
    fn test_normalize_text_reply() {
        let wrapped = normalize_text_reply(200, "HEADLINE: X".to_string());
        assert_eq!(parse_chat_body(&wrapped.body), Some("HEADLINE: X".to_string()));

        let passthrough = normalize_text_reply(503, "busy".to_string());
        assert_eq!(passthrough.status, 503);
        assert_eq!(passthrough.body, "busy");

        let already = r#"{"choices":[{"message":{"content":"ok"}}]}"#.to_string();
        assert_eq!(normalize_text_reply(200, already.clone()).body, already);
    }

    #[test]
    fn test_openrouter_headers() {
        let client = ChatCompletionsClient::openrouter("sk-test");
        let headers = client.headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["X-Title"], "The Daily Token");
        assert!(headers.contains_key("HTTP-Referer"));
    }
}
