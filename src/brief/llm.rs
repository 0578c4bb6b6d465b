use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::config::LlmConfig;

/// Hard wall-clock deadline on a single LLM call.
const LLM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM call timed out after 60s")]
    Timeout,
    #[error("LLM network error: {0}")]
    Network(String),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),
}

/// One assistant turn plus per-call token accounting.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The seam between the rewriter and the provider. Trait object so tests can
/// substitute a scripted client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, LlmError>;

    fn model(&self) -> &str;
}

/// USD cost of a call given configured per-million-token rates.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    pub input_rate_per_mtok: f64,
    pub output_rate_per_mtok: f64,
}

impl CostModel {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_rate_per_mtok
            + output_tokens as f64 * self.output_rate_per_mtok)
            / 1_000_000.0
    }
}

/// Rough token estimate for providers that omit usage data: ~4 chars/token.
pub fn approx_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Chat-completions HTTP client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
    max_tokens: u32,
}

impl HttpLlmClient {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, LlmError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = tokio::time::timeout(LLM_TIMEOUT, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let api_response: ApiResponse = tokio::time::timeout(LLM_TIMEOUT, response.json())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = api_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::MalformedResponse("no choices in response".to_string()))?;

        let (input_tokens, output_tokens) = match &api_response.usage {
            Some(usage) => (
                usage
                    .prompt_tokens
                    .unwrap_or_else(|| approx_tokens(system_prompt) + approx_tokens(user_prompt)),
                usage
                    .completion_tokens
                    .unwrap_or_else(|| approx_tokens(&content)),
            ),
            None => (
                approx_tokens(system_prompt) + approx_tokens(user_prompt),
                approx_tokens(&content),
            ),
        };

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_chat_round_trip_with_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "temperature": 0.2,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "==HEADLINE==\nTest"}}],
                "usage": {"prompt_tokens": 321, "completion_tokens": 45}
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(reqwest::Client::new(), &config(&server.uri()));
        let response = client.chat("system", "user").await.unwrap();
        assert!(response.content.contains("==HEADLINE=="));
        assert_eq!(response.input_tokens, 321);
        assert_eq!(response.output_tokens, 45);
    }

    #[tokio::test]
    async fn test_missing_usage_is_approximated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "12345678"}}]
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(reqwest::Client::new(), &config(&server.uri()));
        let response = client.chat("sys", "usr").await.unwrap();
        assert_eq!(response.output_tokens, 2); // 8 chars / 4
        assert!(response.input_tokens > 0);
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(reqwest::Client::new(), &config(&server.uri()));
        let result = client.chat("sys", "usr").await;
        assert!(matches!(result, Err(LlmError::Api { status: 429, .. })));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(reqwest::Client::new(), &config(&server.uri()));
        let result = client.chat("sys", "usr").await;
        assert!(matches!(result, Err(LlmError::MalformedResponse(_))));
    }

    #[test]
    fn test_cost_model() {
        let model = CostModel {
            input_rate_per_mtok: 0.15,
            output_rate_per_mtok: 0.60,
        };
        let cost = model.cost(1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }
}
