//! Rebuilds `WorkflowState` from the persisted context and the history
//! recorded since the previous decision.

use std::fmt;
use tracing::{debug, warn};

use crate::codec::{ContextError, decode_context};
use crate::providers::{DecisionTask, GatewayError, HistoryOrder, TaskGateway};
use crate::state::{CallStatus, WorkflowState};
use crate::{CallId, ErrorDetails, Event, EventId};

/// History and recorded state disagree. Always fatal for the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// A resolution event points at an event id that never scheduled anything.
    UnknownScheduledEvent { kind: &'static str, event_id: EventId },
    /// A resolution event for a call that is not currently running.
    NotRunning {
        kind: &'static str,
        call_id: CallId,
        status: &'static str,
    },
    /// `Scheduled` for a call that is running or already resolved.
    AlreadyScheduled {
        event_id: EventId,
        call_id: CallId,
        status: &'static str,
    },
    /// `Scheduled` maps an event id that already belongs to another call.
    EventIdReused {
        event_id: EventId,
        existing: CallId,
        call_id: CallId,
    },
    DuplicateStarted,
    /// First execution whose history does not begin with `Started`.
    MissingStarted { found: Option<&'static str> },
    Context(ContextError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::UnknownScheduledEvent { kind, event_id } => {
                write!(f, "{kind} references unknown scheduled event {event_id}")
            }
            ReplayError::NotRunning { kind, call_id, status } => {
                write!(f, "{kind} for call {call_id} which is {status}, not running")
            }
            ReplayError::AlreadyScheduled {
                event_id,
                call_id,
                status,
            } => write!(f, "Scheduled event {event_id} for call {call_id} which is already {status}"),
            ReplayError::EventIdReused {
                event_id,
                existing,
                call_id,
            } => write!(f, "event {event_id} schedules call {call_id} but already maps to call {existing}"),
            ReplayError::DuplicateStarted => f.write_str("duplicate Started event"),
            ReplayError::MissingStarted { found: Some(kind) } => {
                write!(f, "first decision expects a Started event, found {kind}")
            }
            ReplayError::MissingStarted { found: None } => {
                f.write_str("first decision expects a Started event, found empty history")
            }
            ReplayError::Context(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<ContextError> for ReplayError {
    fn from(e: ContextError) -> Self {
        ReplayError::Context(e)
    }
}

impl From<ReplayError> for ErrorDetails {
    fn from(e: ReplayError) -> Self {
        ErrorDetails::Protocol { message: e.to_string() }
    }
}

fn status_label(status: CallStatus<'_>) -> &'static str {
    match status {
        CallStatus::NotSeen => "unknown",
        CallStatus::Running => "running",
        CallStatus::Completed(_) => "completed",
        CallStatus::Failed(_) => "failed",
        CallStatus::TimedOut => "timed out",
    }
}

/// Context of the last `DecisionBoundary` and the events after it.
///
/// Without a boundary the whole slice is returned. A boundary that carried
/// no context yields `None` for the context but still cuts the slice.
pub fn split_at_boundary(events: &[Event]) -> (Option<&str>, &[Event]) {
    let last = events
        .iter()
        .rposition(|e| matches!(e, Event::DecisionBoundary { .. }));
    match last {
        Some(idx) => {
            let context = match &events[idx] {
                Event::DecisionBoundary { context, .. } => context.as_deref(),
                _ => None,
            };
            (context, &events[idx + 1..])
        }
        None => (None, events),
    }
}

/// Rebuild state for one decision cycle.
///
/// `events` must be chronological. A boundary found in `events` supersedes
/// `previous_context`; without either, this is the first decision and the
/// history must begin with `Started`.
pub fn replay(previous_context: Option<&str>, events: &[Event]) -> Result<WorkflowState, ReplayError> {
    let (boundary_context, new_events) = split_at_boundary(events);
    let context = boundary_context.or(previous_context);

    let mut state = match context {
        Some(blob) => decode_context(blob)?,
        None => {
            let first = new_events.iter().find(|e| !matches!(e, Event::Other { .. }));
            match first {
                Some(Event::Started { .. }) => WorkflowState::default(),
                other => {
                    return Err(ReplayError::MissingStarted {
                        found: other.map(Event::kind),
                    });
                }
            }
        }
    };

    debug!(
        resumed = context.is_some(),
        skipped = events.len() - new_events.len(),
        applying = new_events.len(),
        "replaying history"
    );
    for event in new_events {
        apply_event(&mut state, event)?;
    }
    Ok(state)
}

/// Apply one event to `state`.
pub fn apply_event(state: &mut WorkflowState, event: &Event) -> Result<(), ReplayError> {
    match event {
        Event::Started { input } => {
            if state.is_started() {
                return Err(ReplayError::DuplicateStarted);
            }
            state.input = Some(input.clone());
        }
        Event::Scheduled { event_id, call_id } => {
            if let Some(existing) = state.correlation.get(event_id)
                && existing != call_id
            {
                return Err(ReplayError::EventIdReused {
                    event_id: *event_id,
                    existing: existing.clone(),
                    call_id: call_id.clone(),
                });
            }
            match state.status(call_id) {
                CallStatus::NotSeen => {}
                CallStatus::TimedOut => {
                    debug!(call_id = %call_id, event_id, "timed-out call rescheduled");
                    state.timed_out.remove(call_id);
                }
                status => {
                    return Err(ReplayError::AlreadyScheduled {
                        event_id: *event_id,
                        call_id: call_id.clone(),
                        status: status_label(status),
                    });
                }
            }
            state.correlation.insert(*event_id, call_id.clone());
            state.running.insert(call_id.clone());
        }
        Event::Completed {
            scheduled_event_id,
            result,
        } => {
            let call_id = take_running(state, "Completed", *scheduled_event_id)?;
            state.results.insert(call_id, result.clone());
        }
        Event::Failed {
            scheduled_event_id,
            reason,
        } => {
            let call_id = take_running(state, "Failed", *scheduled_event_id)?;
            state.errors.insert(call_id, reason.clone());
        }
        Event::TimedOut { scheduled_event_id } => {
            let call_id = take_running(state, "TimedOut", *scheduled_event_id)?;
            state.timed_out.insert(call_id);
        }
        Event::DecisionBoundary { event_id, .. } => {
            debug!(event_id, "ignoring decision boundary inside new events");
        }
        Event::Other { event_id, kind } => {
            debug!(event_id, kind = %kind, "skipping service event");
        }
    }
    Ok(())
}

/// Route a resolution through the correlation table and take the call out of `running`.
fn take_running(
    state: &mut WorkflowState,
    kind: &'static str,
    scheduled_event_id: EventId,
) -> Result<CallId, ReplayError> {
    let Some(call_id) = state.call_for_event(scheduled_event_id).cloned() else {
        return Err(ReplayError::UnknownScheduledEvent {
            kind,
            event_id: scheduled_event_id,
        });
    };
    if !state.running.remove(&call_id) {
        return Err(ReplayError::NotRunning {
            kind,
            status: status_label(state.status(&call_id)),
            call_id,
        });
    }
    Ok(call_id)
}

/// Fetch every page of history a decision needs and return it chronologically.
///
/// Reverse-chronological histories stop paging as soon as a decision
/// boundary has been read, since nothing older is replayed.
pub async fn collect_history(
    gateway: &dyn TaskGateway,
    task: &DecisionTask,
    order: HistoryOrder,
) -> Result<Vec<Event>, GatewayError> {
    let reverse = order == HistoryOrder::ReverseChronological;
    let has_boundary = |events: &[Event]| events.iter().any(|e| matches!(e, Event::DecisionBoundary { .. }));

    let mut events = task.events.clone();
    let mut seen_boundary = reverse && has_boundary(&events);
    let mut page_token = task.next_page_token.clone();
    let mut pages = 1usize;

    while let Some(token) = page_token {
        if seen_boundary {
            break;
        }
        let page = gateway.next_page(&task.task_token, &token).await?;
        pages += 1;
        seen_boundary = reverse && has_boundary(&page.events);
        events.extend(page.events);
        page_token = page.next_page_token;
    }

    if reverse {
        events.reverse();
    } else if task.next_page_token.is_some() && !is_plausibly_chronological(&events) {
        warn!(task_token = %task.task_token, "history pages look out of order");
    }
    debug!(task_token = %task.task_token, pages, events = events.len(), "history collected");
    Ok(events)
}

// Boundary ids carry the history's own numbering; they must increase.
fn is_plausibly_chronological(events: &[Event]) -> bool {
    let ids: Vec<EventId> = events
        .iter()
        .filter_map(|e| match e {
            Event::DecisionBoundary { event_id, .. } => Some(*event_id),
            _ => None,
        })
        .collect();
    ids.windows(2).all(|w| w[0] < w[1])
}
