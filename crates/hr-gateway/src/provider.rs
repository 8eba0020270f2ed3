//! OpenAI-compatible chat completion provider.

use async_trait::async_trait;
use hr_types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Per-attempt timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("AI service reached timeout limit")]
    Timeout,
    #[error("AI service unreachable: {0}")]
    Network(String),
    #[error("AI service returned error: {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed AI service response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Timeouts, connection failures, 5xx/429/408 and malformed bodies are retried;
    /// other 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) | ProviderError::Malformed(_) => {
                true
            }
            ProviderError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
        }
    }
}

pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
}

/// One completion attempt against a remote model. Implementations do not retry.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// HTTPS client for `/chat/completions` with bearer auth.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_url: String,
    referer: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            referer: None,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// `AI_API_URL` (default OpenRouter) and optional `AI_HTTP_REFERER`.
    pub fn from_env() -> Self {
        let api_url = std::env::var("AI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut provider = Self::new(api_url);
        provider.referer = std::env::var("AI_HTTP_REFERER").ok();
        provider
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn map_reqwest(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<String, ProviderError> {
        let body = ChatCompletionBody {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
        };
        let mut req = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&body);
        if let Some(ref referer) = self.referer {
            req = req.header("HTTP-Referer", referer);
        }

        let response = req.send().await.map_err(map_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let completion: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed("no choices returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]
    }

    #[tokio::test]
    async fn sends_model_messages_temperature_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "primary", "temperature": 0.5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new(format!("{}/chat/completions", server.uri()));
        let msgs = messages();
        let out = provider
            .complete(
                "sk-test",
                &CompletionRequest {
                    model: "primary",
                    messages: &msgs,
                    temperature: 0.5,
                },
            )
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        let provider = OpenAiCompatibleProvider::new(server.uri());
        let msgs = messages();
        let err = provider
            .complete(
                "k",
                &CompletionRequest {
                    model: "m",
                    messages: &msgs,
                    temperature: 0.7,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unexpected_shape_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;
        let provider = OpenAiCompatibleProvider::new(server.uri());
        let msgs = messages();
        let err = provider
            .complete(
                "k",
                &CompletionRequest {
                    model: "m",
                    messages: &msgs,
                    temperature: 0.7,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"choices": [{"message": {"content": "late"}}]})),
            )
            .mount(&server)
            .await;
        let provider =
            OpenAiCompatibleProvider::new(server.uri()).with_timeout(Duration::from_millis(50));
        let msgs = messages();
        let err = provider
            .complete(
                "k",
                &CompletionRequest {
                    model: "m",
                    messages: &msgs,
                    temperature: 0.7,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout));
    }

    #[test]
    fn client_errors_are_not_transient() {
        let e = ProviderError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(!e.is_transient());
        assert!(ProviderError::Status {
            status: 429,
            body: String::new()
        }
        .is_transient());
    }
}
