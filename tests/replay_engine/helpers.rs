//! Event builders shared by the replay engine tests.

use replayflow::codec::encode_context;
use replayflow::runtime::replay_engine::replay;
use replayflow::{CallId, Event, EventId, WorkflowState};

pub const INPUT: &str = r#"{"order":42}"#;

pub fn started() -> Event {
    Event::Started { input: INPUT.to_string() }
}

pub fn scheduled(event_id: EventId, call: &str) -> Event {
    Event::Scheduled {
        event_id,
        call_id: CallId::from(call),
    }
}

pub fn completed(scheduled_event_id: EventId, result: &str) -> Event {
    Event::Completed {
        scheduled_event_id,
        result: result.to_string(),
    }
}

pub fn failed(scheduled_event_id: EventId, reason: &str) -> Event {
    Event::Failed {
        scheduled_event_id,
        reason: reason.to_string(),
    }
}

pub fn timed_out(scheduled_event_id: EventId) -> Event {
    Event::TimedOut { scheduled_event_id }
}

pub fn other(event_id: EventId, kind: &str) -> Event {
    Event::Other {
        event_id,
        kind: kind.to_string(),
    }
}

/// Boundary persisting `state` as the decision's context.
pub fn boundary(event_id: EventId, state: &WorkflowState) -> Event {
    Event::DecisionBoundary {
        event_id,
        context: Some(encode_context(state).unwrap()),
    }
}

pub fn replay_fresh(events: &[Event]) -> WorkflowState {
    replay(None, events).unwrap()
}

pub fn id(call: &str) -> CallId {
    CallId::from(call)
}
