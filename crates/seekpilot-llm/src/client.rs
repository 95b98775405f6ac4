//! Non-streaming chat completions against an OpenAI-compatible endpoint.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use seekpilot_core::config::LlmConfig;
use seekpilot_core::{Error, Result};

use crate::types::{ChatMessage, Completion, CompletionRequest, CompletionResponse};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Chat completion client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config(
                "missing API key (OPENAI_API_KEY or SILICONFLOW_API_KEY)".into(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: completions_url(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one completion, retrying transport errors, 429 and 5xx.
    pub async fn complete(&self, messages: &[ChatMessage], max_tokens: u32, temperature: f32) -> Result<Completion> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
        };

        let mut attempt = 0;
        loop {
            debug!("Completion request to {} (attempt {})", self.endpoint, attempt + 1);
            let failure = match self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let parsed: CompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::Llm(format!("bad completion payload: {}", e)))?;
                    return Ok(parsed.into_completion(&self.model));
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let error = Error::Llm(format!("API error {}: {}", status, text));
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => Error::Http(format!("Request failed: {}", e)),
            };

            if attempt >= self.max_retries {
                return Err(failure);
            }
            let delay = retry_delay(attempt);
            warn!("{}; retrying in {:?}", failure, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// `{base}/chat/completions`, tolerating a trailing slash.
pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Exponential backoff from `RETRY_BASE_DELAY`, capped at `MAX_RETRY_DELAY`.
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://api.siliconflow.cn/v1/"),
            "https://api.siliconflow.cn/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:8080/v1"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(6), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(32), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_new_requires_api_key() {
        let mut config = LlmConfig::default();
        config.api_key = "  ".into();
        assert!(matches!(LlmClient::new(&config), Err(Error::Config(_))));

        config.api_key = "sk-test".into();
        config.model = "m".into();
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.model(), "m");
    }
}
