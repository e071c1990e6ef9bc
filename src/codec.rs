//! Encoding of the opaque context blob the task service stores between
//! decision cycles, and of the per-call side context inside it.
//!
//! Payload and context fields are carried as already-serialized strings; the
//! serializer never looks inside them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::WorkflowState;

/// The context blob could not be produced or read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextError {
    pub message: String,
}

impl ContextError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow context: {}", self.message)
    }
}

impl std::error::Error for ContextError {}

/// Serialize the persisted fields of `state`.
pub fn encode_context(state: &WorkflowState) -> Result<String, ContextError> {
    serde_json::to_string(state).map_err(|e| ContextError::new(e.to_string()))
}

/// Inverse of [`encode_context`].
pub fn decode_context(blob: &str) -> Result<WorkflowState, ContextError> {
    if blob.trim().is_empty() {
        return Err(ContextError::new("empty context"));
    }
    serde_json::from_str(blob).map_err(|e| ContextError::new(e.to_string()))
}

/// Side context recorded for each queued call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Reschedules still allowed after a timeout.
    pub retries_left: u32,
    /// Caller-supplied opaque data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CallContext {
    pub fn new(retries_left: u32, user: Option<String>) -> Self {
        Self { retries_left, user }
    }

    pub fn encode(&self) -> Result<String, ContextError> {
        serde_json::to_string(self).map_err(|e| ContextError::new(e.to_string()))
    }

    pub fn decode(s: &str) -> Result<Self, ContextError> {
        serde_json::from_str(s).map_err(|e| ContextError::new(format!("call context: {e}")))
    }
}
