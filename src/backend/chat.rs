//! OpenAI-compatible Chat Completions backend (Ollama, llama.cpp server,
//! OpenAI and friends all speak it).

use super::GenerationBackend;
use crate::config::BackendConfig;
use crate::{ColloquyError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BASE_DELAY_MS: u64 = 200;
const MAX_ERROR_DETAIL_CHARS: usize = 500;

static THINK_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").unwrap());

// ─── Chat Completions API types ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

// ─── Backend ────────────────────────────────────────────────────────

/// Backend that posts a single user message to `{base_url}/chat/completions`
pub struct ChatBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_attempts: u32,
    temperature: f32,
    max_tokens: u32,
}

impl ChatBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(ColloquyError::Config("max_attempts must be at least 1".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_attempts: config.max_attempts,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Drop `<think>...</think>` blocks some local models emit before answering
    fn strip_think_tags(content: &str) -> String {
        if THINK_TAGS.is_match(content) {
            if let Some(caps) = THINK_TAGS.captures(content) {
                debug!("Model thinking: {}", caps.get(1).map(|m| m.as_str().trim()).unwrap_or(""));
            }
            THINK_TAGS.replace_all(content, "").trim().to_string()
        } else if content.trim_start().starts_with("<think>") {
            // Unterminated thinking block: nothing usable followed it
            String::new()
        } else {
            content.trim().to_string()
        }
    }

    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
        let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }

    fn is_retryable_error(msg: &str) -> bool {
        msg.contains("timeout")
            || msg.contains("network")
            || msg.contains("retryable")
            || msg.contains("error sending request")
            || msg.contains("connection")
    }

    async fn send_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut req_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let response = Self::check_response_status(response).await?;

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ColloquyError::BackendUnavailable(format!("malformed response: {e}")))?;

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = Self::extract_error_detail(&body);
        let detail = Self::truncate_error_detail(&detail, MAX_ERROR_DETAIL_CHARS);
        let prefix = if status.is_server_error() {
            "retryable API error"
        } else {
            "API error"
        };
        if detail.is_empty() {
            Err(ColloquyError::BackendUnavailable(format!("{prefix} {status}")))
        } else {
            Err(ColloquyError::BackendUnavailable(format!(
                "{prefix} {status}: {detail}"
            )))
        }
    }

    fn extract_error_detail(body: &str) -> String {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(msg) = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
            {
                return msg.to_string();
            }
            // Ollama: {"error": "model not found"}
            if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
                return msg.to_string();
            }
            if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
                return msg.to_string();
            }
        }

        trimmed.to_string()
    }

    fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
        if detail.chars().count() <= max_chars {
            return detail.to_string();
        }

        let mut truncated = detail.chars().take(max_chars).collect::<String>();
        truncated.push_str("... [truncated]");
        truncated
    }

    fn map_reqwest_error(e: reqwest::Error) -> ColloquyError {
        if e.is_timeout() {
            ColloquyError::BackendUnavailable(format!("timeout: {e}"))
        } else if e.is_connect() {
            ColloquyError::BackendUnavailable(format!("network: {e}"))
        } else {
            ColloquyError::BackendUnavailable(e.to_string())
        }
    }
}

#[async_trait]
impl GenerationBackend for ChatBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!("Calling {} with prompt length: {}", self.model, prompt.len());

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = Self::retry_backoff(attempt);
                warn!(
                    "Generation request failed (attempt {}/{}), retrying in {:?}...",
                    attempt, self.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_request(prompt).await {
                Ok(content) => {
                    let text = Self::strip_think_tags(&content);
                    debug!("Generation response: {}", text);
                    return Ok(text);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt < self.max_attempts && Self::is_retryable_error(&e.to_string()) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_tags() {
        assert_eq!(
            ChatBackend::strip_think_tags("<think>who talks?</think>\n[smiles] \"Hi\""),
            "[smiles] \"Hi\""
        );
        assert_eq!(ChatBackend::strip_think_tags("<think>rambling"), "");
        assert_eq!(ChatBackend::strip_think_tags("  plain  "), "plain");
    }

    #[test]
    fn test_extract_error_detail() {
        assert_eq!(
            ChatBackend::extract_error_detail(r#"{"error": {"message": "bad key"}}"#),
            "bad key"
        );
        assert_eq!(
            ChatBackend::extract_error_detail(r#"{"error": "model 'x' not found"}"#),
            "model 'x' not found"
        );
        assert_eq!(ChatBackend::extract_error_detail("  gateway down "), "gateway down");
        assert_eq!(ChatBackend::extract_error_detail(""), "");
    }

    #[test]
    fn test_truncate_error_detail() {
        let long = "x".repeat(600);
        let truncated = ChatBackend::truncate_error_detail(&long, 500);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(ChatBackend::truncate_error_detail("short", 500), "short");
    }

    #[test]
    fn test_retry_classification() {
        assert!(ChatBackend::is_retryable_error("retryable API error 503"));
        assert!(ChatBackend::is_retryable_error("network: connection refused"));
        assert!(!ChatBackend::is_retryable_error("API error 401 Unauthorized"));
        assert!(ChatBackend::retry_backoff(2) > ChatBackend::retry_backoff(1));
    }

    #[test]
    fn test_new_rejects_zero_attempts() {
        let config = BackendConfig {
            max_attempts: 0,
            ..BackendConfig::default()
        };
        assert!(ChatBackend::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_error() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            request_timeout: Duration::from_secs(2),
            ..BackendConfig::default()
        };
        let backend = ChatBackend::new(&config).unwrap();
        let err = backend.complete("hello").await.unwrap_err();
        assert!(matches!(err, ColloquyError::BackendUnavailable(_)));
    }
}
