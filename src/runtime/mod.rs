//! Decision machinery: replay, one decision turn, and the polling host.

use async_trait::async_trait;

use crate::WorkflowContext;
use crate::backoff::BackoffStrategy;
use crate::options::ActivityOptions;
use crate::providers::HistoryOrder;

pub mod decision_turn;
pub mod dispatcher;
pub mod limits;
pub mod observability;
pub mod registry;
pub mod replay_engine;

pub use decision_turn::{DecisionTurn, TurnResult};
pub use dispatcher::Decider;
pub use observability::{DeciderMetrics, LogFormat, MetricsSnapshot, ObservabilityConfig, init_logging};
pub use registry::{
    ActivityProxy, ActivityProxyBuilder, ActivityRegistry, ActivityRegistryBuilder, WorkflowDefinition,
    WorkflowRegistry, WorkflowRegistryBuilder,
};

/// Configuration for a [`Decider`].
#[derive(Debug, Clone)]
pub struct DeciderOptions {
    /// Task list polled for decision tasks.
    pub task_list: String,
    /// Reported to the service with every poll.
    pub identity: String,
    /// Page order the task service uses for history.
    pub history_order: HistoryOrder,
    /// Delay schedule between failed polls; the attempt counter resets after a success.
    pub poll_backoff: BackoffStrategy,
    /// Bottom of option resolution for every call.
    pub engine_defaults: ActivityOptions,
    /// When set, `Decider::start` installs a global subscriber with this configuration.
    pub observability: Option<ObservabilityConfig>,
}

impl Default for DeciderOptions {
    fn default() -> Self {
        Self {
            task_list: "default".to_string(),
            identity: format!("replayflow-decider-{}", std::process::id()),
            history_order: HistoryOrder::Chronological,
            poll_backoff: BackoffStrategy::default(),
            engine_defaults: limits::engine_default_options(),
            observability: None,
        }
    }
}

/// Coordination code for one workflow type.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `WorkflowHandler`.
pub struct FnWorkflow<F>(pub F);

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F>
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}
