//! Histories that contradict the recorded state.

use super::helpers::*;
use replayflow::ErrorDetails;
use replayflow::codec::encode_context;
use replayflow::runtime::replay_engine::{ReplayError, replay};
use replayflow::WorkflowState;

fn violation(events: &[replayflow::Event]) -> ReplayError {
    replay(None, events).unwrap_err()
}

#[test]
fn completion_for_unknown_scheduled_event() {
    let err = violation(&[started(), completed(7, "x")]);
    assert_eq!(
        err,
        ReplayError::UnknownScheduledEvent {
            kind: "Completed",
            event_id: 7
        }
    );
    assert_eq!(err.to_string(), "Completed references unknown scheduled event 7");
}

#[test]
fn resolving_an_already_resolved_call() {
    let err = violation(&[started(), scheduled(2, "0"), failed(2, "bad"), timed_out(2)]);
    match err {
        ReplayError::NotRunning { kind, call_id, status } => {
            assert_eq!(kind, "TimedOut");
            assert_eq!(call_id, id("0"));
            assert_eq!(status, "failed");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn scheduling_a_running_or_completed_call() {
    let err = violation(&[started(), scheduled(2, "0"), scheduled(3, "0")]);
    assert!(matches!(err, ReplayError::AlreadyScheduled { status: "running", .. }));

    let err = violation(&[started(), scheduled(2, "0"), completed(2, "r"), scheduled(4, "0")]);
    assert!(matches!(err, ReplayError::AlreadyScheduled { status: "completed", .. }));
}

#[test]
fn event_id_cannot_move_to_another_call() {
    let err = violation(&[started(), scheduled(2, "0"), completed(2, "r"), scheduled(2, "1")]);
    assert_eq!(
        err,
        ReplayError::EventIdReused {
            event_id: 2,
            existing: id("0"),
            call_id: id("1")
        }
    );
}

#[test]
fn started_twice() {
    assert_eq!(violation(&[started(), started()]), ReplayError::DuplicateStarted);

    let ctx = encode_context(&WorkflowState::started(INPUT)).unwrap();
    assert_eq!(replay(Some(&ctx), &[started()]).unwrap_err(), ReplayError::DuplicateStarted);
}

#[test]
fn first_decision_needs_started() {
    assert_eq!(
        violation(&[other(1, "Signal"), scheduled(2, "0")]),
        ReplayError::MissingStarted {
            found: Some("Scheduled")
        }
    );
}

#[test]
fn undecodable_context_is_a_violation() {
    let err = replay(Some("{\"input\":"), &[]).unwrap_err();
    assert!(matches!(err, ReplayError::Context(_)));
    let details: ErrorDetails = err.into();
    assert!(details.is_protocol_violation());
    assert!(details.display_message().starts_with("protocol violation: invalid workflow context"));
}
