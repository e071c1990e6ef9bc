// Not every test crate that pulls in `common` uses every helper.
#![allow(dead_code)]

pub mod fault_injection;
pub mod tracing_capture;

use async_trait::async_trait;
use replayflow::providers::in_memory::{InMemoryGateway, InMemoryOptions};
use replayflow::providers::{DecisionTask, EventPage, GatewayError, SchedulingRequest, TaskGateway};
use replayflow::runtime::replay_engine::replay;
use replayflow::runtime::{Decider, DeciderOptions, DecisionTurn, FnWorkflow, TurnResult, WorkflowHandler};
use replayflow::{
    ActivityProxy, ActivityRegistry, BackoffStrategy, CallId, Event, EventId, WorkflowContext, WorkflowRegistry,
};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const WORKFLOW: &str = "Pipeline";
pub const VERSION: &str = "1";

/// Registry of plain proxies, one per name.
pub fn activities(names: &[&str]) -> ActivityRegistry {
    names
        .iter()
        .fold(ActivityRegistry::builder(), |b, name| {
            b.register(ActivityProxy::builder(*name, "1").build())
        })
        .build_result()
        .unwrap()
}

pub fn single_workflow<F, Fut>(activities: ActivityRegistry, f: F) -> WorkflowRegistry
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    WorkflowRegistry::builder()
        .register(WORKFLOW, VERSION, activities, f)
        .build_result()
        .unwrap()
}

pub fn fast_options() -> DeciderOptions {
    DeciderOptions {
        poll_backoff: BackoffStrategy::Fixed {
            delay: Duration::from_millis(1),
        },
        ..Default::default()
    }
}

pub fn quick_gateway() -> Arc<InMemoryGateway> {
    Arc::new(InMemoryGateway::with_options(InMemoryOptions {
        poll_timeout: Duration::from_millis(20),
        ..Default::default()
    }))
}

/// Poll until a decision task is processed and return what was reported.
pub async fn decide(decider: &Decider) -> TurnResult {
    for _ in 0..100 {
        if let Some(result) = decider.poll_once().await.unwrap() {
            return result;
        }
    }
    panic!("no decision task arrived");
}

pub fn expect_requests(result: &TurnResult) -> &[SchedulingRequest] {
    match result {
        TurnResult::Suspended { requests, .. } => requests,
        other => panic!("expected a suspended decision, got {other:?}"),
    }
}

/// What a scripted gateway was told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reported {
    Submitted { requests: Vec<SchedulingRequest>, context: String },
    Completed(String),
    Failed(String),
}

/// Hands out prepared decision tasks and records every report.
#[derive(Default)]
pub struct ScriptedGateway {
    tasks: Mutex<VecDeque<DecisionTask>>,
    pub reports: Mutex<Vec<(String, Reported)>>,
}

impl ScriptedGateway {
    pub fn new(tasks: Vec<DecisionTask>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub async fn reports(&self) -> Vec<Reported> {
        self.reports.lock().await.iter().map(|(_, r)| r.clone()).collect()
    }

    async fn record(&self, token: &str, report: Reported) {
        self.reports.lock().await.push((token.to_string(), report));
    }
}

#[async_trait]
impl TaskGateway for ScriptedGateway {
    async fn poll_decision(&self, _task_list: &str, _identity: &str) -> Result<Option<DecisionTask>, GatewayError> {
        Ok(self.tasks.lock().await.pop_front())
    }

    async fn next_page(&self, task_token: &str, page_token: &str) -> Result<EventPage, GatewayError> {
        Err(GatewayError::permanent(
            "next_page",
            format!("scripted task {task_token} has no page {page_token}"),
        ))
    }

    async fn submit_decision(
        &self,
        task_token: &str,
        requests: Vec<SchedulingRequest>,
        context: String,
    ) -> Result<(), GatewayError> {
        self.record(task_token, Reported::Submitted { requests, context }).await;
        Ok(())
    }

    async fn complete_workflow(&self, task_token: &str, result: String) -> Result<(), GatewayError> {
        self.record(task_token, Reported::Completed(result)).await;
        Ok(())
    }

    async fn fail_workflow(&self, task_token: &str, reason: String) -> Result<(), GatewayError> {
        self.record(task_token, Reported::Failed(reason)).await;
        Ok(())
    }
}

pub fn scripted_task(token: &str, name: &str, version: &str, events: Vec<Event>) -> DecisionTask {
    DecisionTask {
        task_token: token.to_string(),
        workflow_id: format!("wf-{token}"),
        workflow_name: name.to_string(),
        workflow_version: version.to_string(),
        previous_context: None,
        events,
        next_page_token: None,
    }
}

/// Drives `DecisionTurn` pass by pass, playing the service's part in memory.
///
/// Each suspended pass persists its context and turns requests into
/// `Scheduled` events for the next pass; tests resolve calls in between.
pub struct TurnHarness {
    handler: Arc<dyn WorkflowHandler>,
    activities: ActivityRegistry,
    context: Option<String>,
    pending: Vec<Event>,
    open: BTreeMap<CallId, EventId>,
    next_event_id: EventId,
    pub passes: usize,
}

impl TurnHarness {
    pub fn new<F, Fut>(input: &str, activities: ActivityRegistry, f: F) -> Self
    where
        F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        Self {
            handler: Arc::new(FnWorkflow(f)),
            activities,
            context: None,
            pending: vec![Event::Started { input: input.to_string() }],
            open: BTreeMap::new(),
            next_event_id: 2,
            passes: 0,
        }
    }

    pub fn pass(&mut self) -> TurnResult {
        let events = std::mem::take(&mut self.pending);
        let state = replay(self.context.as_deref(), &events).unwrap();
        let result = DecisionTurn::new(WORKFLOW, VERSION, state).execute(self.handler.clone(), self.activities.clone());
        self.passes += 1;
        if let TurnResult::Suspended { requests, context } = &result {
            self.context = Some(context.clone());
            for req in requests {
                let event_id = self.bump();
                assert!(
                    self.open.insert(req.call_id.clone(), event_id).is_none(),
                    "call {} requested while still open",
                    req.call_id
                );
                self.pending.push(Event::Scheduled {
                    event_id,
                    call_id: req.call_id.clone(),
                });
            }
        }
        result
    }

    pub fn complete(&mut self, call: &str, result: &str) {
        let scheduled_event_id = self.close(call);
        self.pending.push(Event::Completed {
            scheduled_event_id,
            result: result.to_string(),
        });
    }

    pub fn fail(&mut self, call: &str, reason: &str) {
        let scheduled_event_id = self.close(call);
        self.pending.push(Event::Failed {
            scheduled_event_id,
            reason: reason.to_string(),
        });
    }

    pub fn time_out(&mut self, call: &str) {
        let scheduled_event_id = self.close(call);
        self.pending.push(Event::TimedOut { scheduled_event_id });
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn close(&mut self, call: &str) -> EventId {
        self.bump();
        self.open
            .remove(&CallId::from(call))
            .unwrap_or_else(|| panic!("call {call} is not open"))
    }

    fn bump(&mut self) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }
}
