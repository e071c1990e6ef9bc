use ::futures::task::noop_waker_ref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::WorkflowHandler;
use super::limits::{MAX_CONTEXT_BYTES, engine_default_options};
use super::registry::ActivityRegistry;
use crate::codec::encode_context;
use crate::context::{PassOutcome, WorkflowContext};
use crate::options::ActivityOptions;
use crate::providers::SchedulingRequest;
use crate::state::WorkflowState;
use crate::{AppErrorKind, ErrorDetails};

/// Result of one decision cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    /// Waiting on calls; submit `requests` (possibly empty) and `context`.
    Suspended {
        requests: Vec<SchedulingRequest>,
        context: String,
    },
    Completed { result: String },
    Failed(ErrorDetails),
}

/// One pass of coordination code over a replayed state.
pub struct DecisionTurn {
    workflow_name: String,
    workflow_version: String,
    state: WorkflowState,
    engine_defaults: ActivityOptions,
}

impl DecisionTurn {
    pub fn new(workflow_name: impl Into<String>, workflow_version: impl Into<String>, state: WorkflowState) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_version: workflow_version.into(),
            state,
            engine_defaults: engine_default_options(),
        }
    }

    /// Replace the engine-wide fallback options.
    pub fn with_engine_defaults(mut self, defaults: ActivityOptions) -> Self {
        self.engine_defaults = defaults;
        self
    }

    /// Run the coordination function once.
    ///
    /// The function is polled a single time; a pending `.await` anywhere in it
    /// ends the pass. Panics are captured and fail the workflow.
    pub fn execute(self, handler: Arc<dyn WorkflowHandler>, activities: ActivityRegistry) -> TurnResult {
        let name = self.workflow_name.clone();
        let input = self.state.input.clone().unwrap_or_default();
        let ctx = WorkflowContext::new(
            self.workflow_name,
            self.workflow_version,
            self.state,
            activities,
            self.engine_defaults,
        );

        debug!(workflow = %name, "executing decision turn");
        let polled = catch_unwind(AssertUnwindSafe(|| {
            let mut fut = handler.invoke(ctx.clone(), input);
            let mut cx = Context::from_waker(noop_waker_ref());
            fut.as_mut().poll(&mut cx)
        }));

        let outcome = ctx.take_outcome();
        debug!(
            workflow = %name,
            calls_issued = outcome.calls_issued,
            requests = outcome.requests.len(),
            "decision turn finished"
        );

        let poll = match polled {
            Ok(poll) => poll,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "workflow panicked".to_string()
                };
                Poll::Ready(Err(format!("workflow panicked: {msg}")))
            }
        };

        Self::classify(&name, poll, outcome)
    }

    fn classify(name: &str, poll: Poll<Result<String, String>>, outcome: PassOutcome) -> TurnResult {
        let PassOutcome {
            state, requests, fatal, ..
        } = outcome;

        if let Some(details) = fatal {
            return TurnResult::Failed(details);
        }

        match poll {
            Poll::Ready(Err(message)) => TurnResult::Failed(ErrorDetails::Application {
                kind: AppErrorKind::WorkflowFailed,
                message,
            }),
            Poll::Ready(Ok(result)) if !state.has_running() && requests.is_empty() => {
                TurnResult::Completed { result }
            }
            Poll::Ready(Ok(_)) => {
                warn!(
                    workflow = %name,
                    running = state.running.len(),
                    requests = requests.len(),
                    "workflow returned while calls are outstanding; treating the result as provisional"
                );
                Self::suspend(state, requests)
            }
            Poll::Pending => Self::suspend(state, requests),
        }
    }

    fn suspend(state: WorkflowState, requests: Vec<SchedulingRequest>) -> TurnResult {
        let context = match encode_context(&state) {
            Ok(context) => context,
            Err(e) => {
                return TurnResult::Failed(ErrorDetails::Infrastructure {
                    operation: "encode_context".to_string(),
                    message: e.to_string(),
                });
            }
        };
        if context.len() > MAX_CONTEXT_BYTES {
            return TurnResult::Failed(ErrorDetails::Infrastructure {
                operation: "encode_context".to_string(),
                message: format!(
                    "workflow context is {} bytes, exceeding the limit of {MAX_CONTEXT_BYTES}",
                    context.len()
                ),
            });
        }
        TurnResult::Suspended { requests, context }
    }
}
