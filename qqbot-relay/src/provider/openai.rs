//! OpenAI-compatible chat completion provider.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER_NAME: &str = "openai";

/// Provider for any endpoint speaking the OpenAI `/chat/completions` dialect.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: &str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> qqbot_common::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                qqbot_common::Error::Config("API key contains invalid header characters".into())
            })?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| qqbot_common::Error::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let model = request.model.clone();

        let body = CompletionRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("Request timed out: {e}")
                } else {
                    format!("Request failed: {e}")
                };
                ProviderError::new(PROVIDER_NAME, &model, message)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::new(PROVIDER_NAME, &model, format!("API error: {body}"))
                    .with_status(status.as_u16()),
            );
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                PROVIDER_NAME,
                &model,
                format!("Failed to parse response: {e}"),
            )
        })?;

        let choice = completion.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::new(PROVIDER_NAME, &model, "Empty completion"))?;

        let usage = completion.usage.unwrap_or_default();

        Ok(ChatResponse {
            model: completion.model.unwrap_or(model),
            content,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![ChatMessage::system("be nice"), ChatMessage::user("你好")],
            max_tokens: Some(1000),
            temperature: Some(0.5),
        }
    }

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-test",
            format!("{}/v1/", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn posts_completion_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 1000,
                "messages": [
                    { "role": "system", "content": "be nice" },
                    { "role": "user", "content": "你好" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-3.5-turbo-0125",
                "choices": [{
                    "message": { "role": "assistant", "content": "你好呀" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server).chat(request()).await.unwrap();
        assert_eq!(response.content, "你好呀");
        assert_eq!(response.usage.total(), 16);
        assert_eq!(response.model, "gpt-3.5-turbo-0125");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn missing_usage_counts_as_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "ok" } }]
            })))
            .mount(&server)
            .await;

        let response = provider(&server).chat(request()).await.unwrap();
        assert_eq!(response.usage.total(), 0);
        assert_eq!(response.model, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = provider(&server).chat(request()).await.unwrap_err();
        assert_eq!(err.status_code, Some(429));
        assert!(err.message.contains("rate limited"));
    }

    #[tokio::test]
    async fn empty_content_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": null } }]
            })))
            .mount(&server)
            .await;

        let err = provider(&server).chat(request()).await.unwrap_err();
        assert_eq!(err.message, "Empty completion");
    }

    #[test]
    fn request_serialization_skips_unset_fields() {
        let body = CompletionRequest {
            model: "gpt-4o",
            messages: vec![WireMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: None,
            temperature: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
    }
}
