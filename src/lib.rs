//! Client-side workflow decider built on deterministic replay.
//!
//! Coordination logic is written as ordinary sequential `async` code. Every
//! time the task service asks for a decision, the code is run again from the
//! top against a `WorkflowState` rebuilt from the persisted context plus the
//! events recorded since the previous decision. Calls whose outcome is already
//! known resolve immediately, calls that were never made are turned into
//! scheduling requests, and the first unresolved `.await` suspends the pass.
//!
//! The crate provides:
//!
//! - Public data model: [`Event`], [`CallId`], [`EventId`], [`ErrorDetails`]
//! - History replay: [`runtime::replay_engine`]
//! - The futures model: [`DurableFuture`], [`Arg`], [`WorkflowContext`]
//! - Hierarchical activity options: [`ActivityOptions`], [`OptionStack`]
//! - The opaque context blob: [`codec`]
//! - One decision cycle and the polling host: [`runtime::decision_turn`],
//!   [`runtime::Decider`]
//! - The task service seam: [`providers::TaskGateway`] and an in-memory
//!   simulation for tests

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod backoff;
pub mod codec;
pub mod context;
pub mod futures;
pub mod logging;
pub mod options;
pub mod providers;
pub mod runtime;
pub mod state;

pub use backoff::BackoffStrategy;
pub use context::{ActivityHandle, WorkflowContext};
pub use futures::{ActivityError, ActivityErrorKind, Arg, CallState, DurableFuture, JoinFuture};
pub use options::{ActivityOptions, OptionScope, OptionStack};
pub use runtime::registry::{ActivityProxy, ActivityRegistry, WorkflowRegistry};
pub use runtime::{Decider, DeciderOptions, WorkflowHandler};
pub use state::{CallStatus, WorkflowState};

// Internal codec utilities for typed I/O (kept private; public API remains ergonomic)
pub(crate) mod _typed_codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;

    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }

    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // Bare strings travel unquoted so string results stay human-readable
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => {
                    let val = Value::String(s.to_string());
                    serde_json::from_value(val).map_err(|e| e.to_string())
                }
            }
        }
    }

    /// Parse a payload as JSON, falling back to a JSON string for raw text.
    pub fn to_json_value(s: &str) -> Value {
        serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
    }
}

/// Identifier assigned by the external history, totally ordered within one
/// workflow execution.
pub type EventId = u64;

/// Deterministic per-pass identifier of one invocation site.
///
/// Assigned in the order the coordination code issues invocations, starting
/// at `"0"` on every pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for the `index`-th invocation of a pass.
    pub fn from_index(index: u64) -> Self {
        Self(index.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Entries of the append-only workflow history, as delivered by the task
/// service.
///
/// Only `Scheduled` carries a call id. Resolution events reference the event
/// id of the scheduling event and are routed through the correlation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The execution was started with this input.
    Started { input: String },
    /// A unit of work was scheduled on behalf of `call_id`.
    Scheduled { event_id: EventId, call_id: CallId },
    /// The work scheduled at `scheduled_event_id` completed.
    Completed { scheduled_event_id: EventId, result: String },
    /// The work scheduled at `scheduled_event_id` reported failure.
    Failed { scheduled_event_id: EventId, reason: String },
    /// The work scheduled at `scheduled_event_id` timed out.
    TimedOut { scheduled_event_id: EventId },
    /// A previous decision was completed; `context` is what it persisted.
    DecisionBoundary { event_id: EventId, context: Option<String> },
    /// Service bookkeeping the decider does not act on.
    Other { event_id: EventId, kind: String },
}

impl Event {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "Started",
            Event::Scheduled { .. } => "Scheduled",
            Event::Completed { .. } => "Completed",
            Event::Failed { .. } => "Failed",
            Event::TimedOut { .. } => "TimedOut",
            Event::DecisionBoundary { .. } => "DecisionBoundary",
            Event::Other { .. } => "Other",
        }
    }
}

/// Application-level failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppErrorKind {
    /// A scheduled activity reported failure and nobody handled it.
    ActivityFailed,
    /// A scheduled activity timed out more often than its retry budget allows.
    ActivityTimedOut,
    /// The coordination code returned an error or panicked.
    WorkflowFailed,
}

/// Terminal reason carried by a failed decision cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDetails {
    /// Coordination-level failure; surfaced verbatim to `fail_workflow`.
    Application { kind: AppErrorKind, message: String },
    /// History and recorded state disagree. Never retried.
    Protocol { message: String },
    /// Decider-side failure (unknown workflow, oversized context, encoding).
    Infrastructure { operation: String, message: String },
}

impl ErrorDetails {
    /// Human-readable reason reported to the task service.
    pub fn display_message(&self) -> String {
        match self {
            ErrorDetails::Application { message, .. } => message.clone(),
            ErrorDetails::Protocol { message } => format!("protocol violation: {message}"),
            ErrorDetails::Infrastructure { operation, message } => format!("{operation}: {message}"),
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ErrorDetails::Protocol { .. })
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_message())
    }
}

impl std::error::Error for ErrorDetails {}
