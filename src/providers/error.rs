/// Transport-level failure talking to the task service, with retry
/// classification.
///
/// The host loop retries retryable poll failures with backoff. Submission
/// failures are reported and left for the service to redeliver the task.
///
/// ```rust,no_run
/// use replayflow::providers::GatewayError;
///
/// # fn example() -> Result<(), GatewayError> {
/// return Err(GatewayError::retryable("poll_decision", "connection reset"));
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    /// Gateway operation that failed (e.g. "poll_decision", "submit_decision")
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl GatewayError {
    /// Transient failure: timeouts, throttling, dropped connections.
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure that will not go away on retry: unknown task token, rejected
    /// decision, bad credentials.
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for GatewayError {}
