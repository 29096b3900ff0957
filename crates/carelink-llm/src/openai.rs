//! Client for OpenAI-compatible `/chat/completions` endpoints. Both OpenAI
//! and DeepSeek speak this dialect; only the base URL, model and key differ.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use carelink_core::errors::ProviderError;
use carelink_core::provider::{CompletionProvider, CompletionRequest, TurnRole};
use carelink_core::security::ApiKey;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    /// Provider label used in logs and in `Suggestion::model_used`.
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

pub struct OpenAiCompatProvider {
    client: Client,
    config: OpenAiCompatConfig,
    endpoint: String,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NetworkError(format!("build HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest<'a>) -> ChatCompletionBody<'a> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: request.system_prompt,
        });
        for turn in request.history {
            messages.push(WireMessage {
                role: match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }

        ChatCompletionBody {
            model: &self.config.model,
            messages,
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, request), fields(provider = %self.config.name, model = %self.config.model))]
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let body = self.build_body(request);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.config.api_key.expose())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(request.timeout)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match ProviderError::from_status(status.as_u16(), body) {
                ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after: retry },
                other => other,
            });
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(request.timeout)
            } else {
                ProviderError::MalformedResponse(e.to_string())
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        debug!(chars = content.chars().count(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::provider::ChatTurn;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(OpenAiCompatConfig {
            name: "deepseek".into(),
            base_url: format!("{}/v1/", server.uri()),
            model: "deepseek-chat".into(),
            api_key: ApiKey::new("test-key"),
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
        })
        .unwrap()
    }

    fn completion(text: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        })
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
            name: "openai".into(),
            base_url: "https://api.openai.com/v1/".into(),
            model: "gpt-3.5-turbo".into(),
            api_key: ApiKey::new("k"),
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
        })
        .unwrap();
        assert_eq!(provider.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn sends_system_prompt_then_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "max_tokens": 2000,
                "messages": [
                    {"role": "system", "content": "you are a doctor"},
                    {"role": "user", "content": "I feel dizzy"},
                    {"role": "assistant", "content": "since when?"},
                    {"role": "user", "content": "this morning"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  drink water  ")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let history = vec![
            ChatTurn::user("I feel dizzy"),
            ChatTurn::assistant("since when?"),
            ChatTurn::user("this morning"),
        ];
        let request =
            CompletionRequest::new("you are a doctor", &history, Duration::from_secs(5));
        let text = provider.complete(&request).await.unwrap();
        assert_eq!(text, "drink water");
    }

    #[tokio::test]
    async fn temperature_override_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"temperature": 0.5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let request = CompletionRequest::new("extract", &[], Duration::from_secs(5))
            .with_temperature(0.5);
        assert_eq!(provider.complete(&request).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .complete(&CompletionRequest::new("s", &[], Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(ref body) if body == "invalid key"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .complete(&CompletionRequest::new("s", &[], Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .complete(&CompletionRequest::new("s", &[], Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .complete(&CompletionRequest::new("s", &[], Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.error_kind(), "server_error");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .complete(&CompletionRequest::new("s", &[], Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(100)));
    }
}
