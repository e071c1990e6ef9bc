//! Gateway wrapper that injects transport failures.

use async_trait::async_trait;
use replayflow::providers::{DecisionTask, EventPage, GatewayError, SchedulingRequest, TaskGateway};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fails the next N calls of each kind, then delegates to `inner`.
pub struct FlakyGateway<G> {
    inner: Arc<G>,
    poll_failures: AtomicU32,
    page_failures: AtomicU32,
    submit_failures: AtomicU32,
    pub polls: AtomicU32,
}

impl<G: TaskGateway> FlakyGateway<G> {
    pub fn new(inner: Arc<G>) -> Self {
        Self {
            inner,
            poll_failures: AtomicU32::new(0),
            page_failures: AtomicU32::new(0),
            submit_failures: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        }
    }

    pub fn fail_polls(&self, n: u32) {
        self.poll_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_pages(&self, n: u32) {
        self.page_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_submits(&self, n: u32) {
        self.submit_failures.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<G: TaskGateway> TaskGateway for FlakyGateway<G> {
    async fn poll_decision(&self, task_list: &str, identity: &str) -> Result<Option<DecisionTask>, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.poll_failures) {
            return Err(GatewayError::retryable("poll_decision", "injected connection reset"));
        }
        self.inner.poll_decision(task_list, identity).await
    }

    async fn next_page(&self, task_token: &str, page_token: &str) -> Result<EventPage, GatewayError> {
        if Self::take(&self.page_failures) {
            return Err(GatewayError::retryable("next_page", "injected throttling"));
        }
        self.inner.next_page(task_token, page_token).await
    }

    async fn submit_decision(
        &self,
        task_token: &str,
        requests: Vec<SchedulingRequest>,
        context: String,
    ) -> Result<(), GatewayError> {
        if Self::take(&self.submit_failures) {
            return Err(GatewayError::retryable("submit_decision", "injected timeout"));
        }
        self.inner.submit_decision(task_token, requests, context).await
    }

    async fn complete_workflow(&self, task_token: &str, result: String) -> Result<(), GatewayError> {
        self.inner.complete_workflow(task_token, result).await
    }

    async fn fail_workflow(&self, task_token: &str, reason: String) -> Result<(), GatewayError> {
        self.inner.fail_workflow(task_token, reason).await
    }
}
