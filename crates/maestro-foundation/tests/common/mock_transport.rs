//! Scripted [`HttpTransport`] that records requests.

use std::collections::VecDeque;

use async_trait::async_trait;
use maestro_foundation::api_service::{HttpRequest, HttpResponse, HttpTransport};
use maestro_kernel::OrchestratorResult;
use parking_lot::Mutex;
use serde_json::{Value, json};

#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<OrchestratorResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response. Once the queue is empty every call gets `200 {}`.
    pub fn respond(self, status: u16, body: Value) -> Self {
        self.replies
            .lock()
            .push_back(Ok(HttpResponse { status, body }));
        self
    }

    pub fn fail(self, error: maestro_kernel::OrchestratorError) -> Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_json(&self, request: HttpRequest) -> OrchestratorResult<HttpResponse> {
        self.requests.lock().push(request);
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 200,
                body: json!({}),
            })
        })
    }
}
