//! Replay Engine Tests
//!
//! Rebuilding `WorkflowState` from persisted context plus new events, across
//! first runs, resumed runs and paged histories.

mod helpers;

mod protocol_violations;
