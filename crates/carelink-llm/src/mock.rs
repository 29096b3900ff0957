use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use carelink_core::errors::ProviderError;
use carelink_core::provider::{ChatTurn, CompletionProvider, CompletionRequest};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(ProviderError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Owned copy of a request the mock received.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

/// Mock provider that returns pre-programmed responses in sequence and
/// honours the request timeout the way a real client does.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(RecordedRequest {
            system_prompt: request.system_prompt.to_string(),
            history: request.history.to_vec(),
            temperature: request.temperature,
            timeout: request.timeout,
        });

        let Some(response) = self.responses.lock().pop_front() else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        tokio::time::timeout(request.timeout, resolve_response(response))
            .await
            .map_err(|_| ProviderError::Timeout(request.timeout))?
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, ProviderError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout: Duration) -> (String, Vec<ChatTurn>, Duration) {
        ("system".to_string(), vec![ChatTurn::user("hi")], timeout)
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("first"), MockResponse::text("second")]);
        let (system, history, timeout) = request(Duration::from_secs(1));
        let req = CompletionRequest::new(&system, &history, timeout);

        assert_eq!(mock.complete(&req).await.unwrap(), "first");
        assert_eq!(mock.complete(&req).await.unwrap(), "second");
        assert_eq!(mock.call_count(), 2);

        let err = mock.complete(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(ProviderError::ProviderOverloaded)]);
        let (system, history, timeout) = request(Duration::from_secs(1));
        let err = mock
            .complete(&CompletionRequest::new(&system, &history, timeout))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockProvider::new(vec![MockResponse::text("ok")]);
        let (system, history, timeout) = request(Duration::from_secs(2));
        let req = CompletionRequest::new(&system, &history, timeout).with_temperature(0.1);
        let _ = mock.complete(&req).await;

        let recorded = mock.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system_prompt, "system");
        assert_eq!(recorded[0].history, vec![ChatTurn::user("hi")]);
        assert_eq!(recorded[0].temperature, Some(0.1));
        assert_eq!(recorded[0].timeout, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_within_timeout_succeeds() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::text("slow"),
        )]);
        let (system, history, _) = request(Duration::ZERO);
        let req = CompletionRequest::new(&system, &history, Duration::from_secs(10));
        assert_eq!(mock.complete(&req).await.unwrap(), "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn delay_past_timeout_times_out() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::text("never"),
        )]);
        let (system, history, _) = request(Duration::ZERO);
        let req = CompletionRequest::new(&system, &history, Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        let err = mock.complete(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
