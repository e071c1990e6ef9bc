use crate::options::ActivityOptions;
use crate::{CallId, Event};

pub mod error;
pub use error::GatewayError;

/// In-memory task service for tests and demos.
pub mod in_memory;
pub use in_memory::InMemoryGateway;

/// Order in which the task service returns history pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    #[default]
    Chronological,
    /// Newest event first; the decider can stop paging at the last decision boundary.
    ReverseChronological,
}

/// One unit of decision work handed out by `poll_decision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionTask {
    /// Opaque token identifying this task to the service.
    pub task_token: String,
    /// Execution the decision is for; used for logging only.
    pub workflow_id: String,
    pub workflow_name: String,
    pub workflow_version: String,
    /// Context persisted by the previous decision, if the service hands it out
    /// separately from the history.
    pub previous_context: Option<String>,
    /// First page of history, in the service's `HistoryOrder`.
    pub events: Vec<Event>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub next_page_token: Option<String>,
}

/// Request to run one activity, emitted by a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingRequest {
    pub call_id: CallId,
    /// Activity name and version to run.
    pub name: String,
    pub version: String,
    /// JSON array of positional arguments.
    pub input: String,
    /// Fully resolved options.
    pub options: ActivityOptions,
    /// Serialized per-call context.
    pub context: String,
}

/// Boundary to the remote task service.
///
/// Implementations handle transport and long polling; the decider only sees
/// decision tasks, history pages and the four reporting calls.
#[async_trait::async_trait]
pub trait TaskGateway: Send + Sync {
    /// Long-poll for the next decision task. `Ok(None)` means the poll
    /// expired without work.
    async fn poll_decision(&self, task_list: &str, identity: &str) -> Result<Option<DecisionTask>, GatewayError>;

    /// Fetch the page of history named by `page_token` for an outstanding task.
    async fn next_page(&self, task_token: &str, page_token: &str) -> Result<EventPage, GatewayError>;

    /// Record the decision: schedule `requests` and persist `context`.
    async fn submit_decision(
        &self,
        task_token: &str,
        requests: Vec<SchedulingRequest>,
        context: String,
    ) -> Result<(), GatewayError>;

    async fn complete_workflow(&self, task_token: &str, result: String) -> Result<(), GatewayError>;

    async fn fail_workflow(&self, task_token: &str, reason: String) -> Result<(), GatewayError>;
}
