//! Host loop: poll for decision tasks, run them, report the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::decision_turn::{DecisionTurn, TurnResult};
use super::observability::{DeciderMetrics, MetricsSnapshot, init_logging};
use super::registry::WorkflowRegistry;
use super::replay_engine::{collect_history, replay};
use super::DeciderOptions;
use crate::ErrorDetails;
use crate::providers::{DecisionTask, GatewayError, TaskGateway};

/// Client-side decider bound to one task list.
pub struct Decider {
    gateway: Arc<dyn TaskGateway>,
    workflows: WorkflowRegistry,
    options: DeciderOptions,
    metrics: DeciderMetrics,
    shutdown_flag: AtomicBool,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Decider {
    /// Build a decider without starting its poll loop.
    pub fn new(gateway: Arc<dyn TaskGateway>, workflows: WorkflowRegistry, options: DeciderOptions) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            workflows,
            options,
            metrics: DeciderMetrics::default(),
            shutdown_flag: AtomicBool::new(false),
            joins: Mutex::new(Vec::new()),
        })
    }

    /// Build a decider and spawn its poll loop on the current tokio runtime.
    pub async fn start(
        gateway: Arc<dyn TaskGateway>,
        workflows: WorkflowRegistry,
        options: DeciderOptions,
    ) -> Arc<Self> {
        if let Some(config) = &options.observability
            && let Err(e) = init_logging(config)
        {
            // A subscriber installed by the host application wins.
            debug!(error = %e, "logging already initialized");
        }
        let decider = Self::new(gateway, workflows, options);
        let handle = decider.clone().spawn_poll_loop();
        decider.joins.lock().await.push(handle);
        decider
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop polling. A decision already being processed is abandoned; the
    /// service redelivers it after its own timeout.
    pub async fn shutdown(self: Arc<Self>) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
        info!(task_list = %self.options.task_list, "decider stopped");
    }

    fn spawn_poll_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                task_list = %self.options.task_list,
                identity = %self.options.identity,
                "decider polling"
            );
            let mut attempt: u32 = 0;
            while !self.shutdown_flag.load(Ordering::SeqCst) {
                match self.poll_once().await {
                    Ok(_) => attempt = 0,
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        self.metrics.record_poll_error();
                        let delay = self.options.poll_backoff.delay_for_attempt(attempt);
                        if e.is_retryable() {
                            warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "poll failed; backing off");
                        } else {
                            error!(
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "poll failed permanently; backing off"
                            );
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    /// Poll once and process the task if one arrives.
    ///
    /// Errors are poll failures only; trouble while processing the task is
    /// logged, counted and reported through `Ok(None)`.
    pub async fn poll_once(&self) -> Result<Option<TurnResult>, GatewayError> {
        let task = self
            .gateway
            .poll_decision(&self.options.task_list, &self.options.identity)
            .await?;
        let Some(task) = task else {
            return Ok(None);
        };
        match self.process_task(task).await {
            Ok(result) => Ok(Some(result)),
            Err(_) => Ok(None),
        }
    }

    /// Replay, decide and report one decision task.
    ///
    /// Returns the decision that was reported. Gateway failures while paging
    /// or reporting are returned as errors and not retried.
    pub async fn process_task(&self, task: DecisionTask) -> Result<TurnResult, GatewayError> {
        debug!(
            task_token = %task.task_token,
            workflow_id = %task.workflow_id,
            workflow = %task.workflow_name,
            version = %task.workflow_version,
            "processing decision task"
        );

        let Some(definition) = self
            .workflows
            .resolve_exact(&task.workflow_name, &task.workflow_version)
        else {
            let details = ErrorDetails::Infrastructure {
                operation: "resolve_workflow".to_string(),
                message: format!(
                    "workflow {}@{} is not registered with this decider",
                    task.workflow_name, task.workflow_version
                ),
            };
            let result = TurnResult::Failed(details);
            self.report(&task, &result).await?;
            return Ok(result);
        };

        let events = match collect_history(self.gateway.as_ref(), &task, self.options.history_order).await {
            Ok(events) => events,
            Err(e) => {
                warn!(task_token = %task.task_token, error = %e, "failed to fetch history");
                self.metrics.record_report_error();
                return Err(e);
            }
        };

        let result = match replay(task.previous_context.as_deref(), &events) {
            Ok(state) => DecisionTurn::new(&task.workflow_name, &task.workflow_version, state)
                .with_engine_defaults(self.options.engine_defaults.clone())
                .execute(definition.handler.clone(), definition.activities.clone()),
            Err(e) => {
                error!(
                    task_token = %task.task_token,
                    workflow_id = %task.workflow_id,
                    error = %e,
                    "protocol violation during replay"
                );
                TurnResult::Failed(e.into())
            }
        };

        self.report(&task, &result).await?;
        Ok(result)
    }

    async fn report(&self, task: &DecisionTask, result: &TurnResult) -> Result<(), GatewayError> {
        let token = task.task_token.as_str();
        let reported = match result {
            TurnResult::Suspended { requests, context } => {
                let n = requests.len();
                let r = self
                    .gateway
                    .submit_decision(token, requests.clone(), context.clone())
                    .await;
                if r.is_ok() {
                    self.metrics.record_decision(n);
                    info!(
                        workflow_id = %task.workflow_id,
                        task_token = %token,
                        requests = n,
                        context_bytes = context.len(),
                        "decision submitted"
                    );
                }
                r
            }
            TurnResult::Completed { result: output } => {
                let r = self.gateway.complete_workflow(token, output.clone()).await;
                if r.is_ok() {
                    self.metrics.record_completion();
                    info!(workflow_id = %task.workflow_id, task_token = %token, "workflow completed");
                }
                r
            }
            TurnResult::Failed(details) => {
                let r = self.gateway.fail_workflow(token, details.display_message()).await;
                if r.is_ok() {
                    self.metrics.record_failure(details);
                    info!(
                        workflow_id = %task.workflow_id,
                        task_token = %token,
                        reason = %details,
                        "workflow failed"
                    );
                }
                r
            }
        };

        if let Err(e) = &reported {
            self.metrics.record_report_error();
            warn!(
                workflow_id = %task.workflow_id,
                task_token = %token,
                error = %e,
                "reporting decision failed; the service will redeliver the task"
            );
        }
        reported
    }
}
