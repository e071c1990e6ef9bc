//! Reconstructed workflow state for one decision cycle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{CallId, EventId};

/// Everything a pass needs to know about earlier passes.
///
/// Ordered collections keep the encoded form stable: equal states always
/// serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Input captured from `Started`; `None` until that event is applied.
    pub input: Option<String>,
    /// Scheduling event id -> call id. Grows monotonically.
    pub correlation: BTreeMap<EventId, CallId>,
    /// Scheduled and not yet resolved.
    pub running: BTreeSet<CallId>,
    pub results: BTreeMap<CallId, String>,
    pub errors: BTreeMap<CallId, String>,
    pub timed_out: BTreeSet<CallId>,
    /// Side-channel data attached when a call was queued.
    pub call_context: BTreeMap<CallId, String>,
    /// User-settable context; the latest value wins.
    pub global_context: Option<String>,
    /// Workflow log sites reached by the furthest earlier pass.
    #[serde(default)]
    pub log_sites: u64,
}

/// Where a call id stands at the current replay point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus<'a> {
    NotSeen,
    Running,
    Completed(&'a str),
    Failed(&'a str),
    TimedOut,
}

impl WorkflowState {
    /// Fresh state for the first decision of an execution.
    pub fn started(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Default::default()
        }
    }

    pub fn is_started(&self) -> bool {
        self.input.is_some()
    }

    /// Status of `call_id`, checked in the order the invocation proxy consults it.
    pub fn status(&self, call_id: &CallId) -> CallStatus<'_> {
        if self.timed_out.contains(call_id) {
            CallStatus::TimedOut
        } else if let Some(result) = self.results.get(call_id) {
            CallStatus::Completed(result)
        } else if let Some(reason) = self.errors.get(call_id) {
            CallStatus::Failed(reason)
        } else if self.running.contains(call_id) {
            CallStatus::Running
        } else {
            CallStatus::NotSeen
        }
    }

    /// Call id that was scheduled by `event_id`, if any.
    pub fn call_for_event(&self, event_id: EventId) -> Option<&CallId> {
        self.correlation.get(&event_id)
    }

    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Number of distinct call ids the history knows about.
    pub fn known_calls(&self) -> usize {
        let mut ids: BTreeSet<&CallId> = self.correlation.values().collect();
        ids.extend(self.running.iter());
        ids.len()
    }

    /// True when every call id sits in exactly one bucket.
    pub fn is_consistent(&self) -> bool {
        let mut seen: BTreeSet<&CallId> = BTreeSet::new();
        let buckets = self
            .running
            .iter()
            .chain(self.results.keys())
            .chain(self.errors.keys())
            .chain(self.timed_out.iter());
        for id in buckets {
            if !seen.insert(id) {
                return false;
            }
        }
        true
    }
}
