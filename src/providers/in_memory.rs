//! Simulated task service.
//!
//! Keeps one append-only history per workflow execution and plays both sides
//! of the service: it hands out decision tasks to deciders and lets test code
//! resolve scheduled calls the way activity workers would. Resolutions that
//! arrive while a decision is outstanding are held back and appended after
//! that decision's boundary, so the next task always sees them. A task that
//! is not reported within `decision_timeout` is taken back and handed out
//! again.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{DecisionTask, EventPage, GatewayError, HistoryOrder, SchedulingRequest, TaskGateway};
use crate::{CallId, Event, EventId};

/// How much history a decision task carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryDelivery {
    /// The whole history; the previous context is only found on the last boundary event.
    #[default]
    Full,
    /// Only events after the last boundary, with `previous_context` set on the task.
    SinceBoundary,
}

#[derive(Debug, Clone)]
pub struct InMemoryOptions {
    pub page_size: usize,
    pub order: HistoryOrder,
    pub delivery: HistoryDelivery,
    /// How long an empty `poll_decision` waits before returning `None`.
    pub poll_timeout: Duration,
    /// How long a decider may hold a task before the service redelivers it.
    pub decision_timeout: Duration,
}

impl Default for InMemoryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            order: HistoryOrder::Chronological,
            delivery: HistoryDelivery::Full,
            poll_timeout: Duration::from_millis(100),
            decision_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Completed { result: String },
    Failed { reason: String },
}

/// One accepted decision, as recorded by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub workflow_id: String,
    pub requests: Vec<SchedulingRequest>,
    pub context: String,
}

struct Execution {
    name: String,
    version: String,
    task_list: String,
    history: Vec<Event>,
    next_event_id: EventId,
    last_boundary: Option<usize>,
    last_context: Option<String>,
    status: ExecutionStatus,
    needs_decision: bool,
    in_flight: Option<String>,
    held: Vec<Event>,
    open_calls: BTreeMap<CallId, (EventId, SchedulingRequest)>,
}

impl Execution {
    fn append(&mut self, event: Event) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;
        let event = match event {
            Event::Scheduled { call_id, .. } => Event::Scheduled { event_id: id, call_id },
            Event::DecisionBoundary { context, .. } => Event::DecisionBoundary { event_id: id, context },
            Event::Other { kind, .. } => Event::Other { event_id: id, kind },
            other => other,
        };
        if matches!(event, Event::DecisionBoundary { .. }) {
            self.last_boundary = Some(self.history.len());
        }
        self.history.push(event);
        id
    }

    /// Append now, or hold until the outstanding decision is submitted.
    fn record(&mut self, event: Event) {
        if self.in_flight.is_some() {
            self.held.push(event);
        } else {
            self.append(event);
            self.needs_decision = true;
        }
    }

    fn delivered_events(&self, delivery: HistoryDelivery) -> Vec<Event> {
        match (delivery, self.last_boundary) {
            (HistoryDelivery::SinceBoundary, Some(idx)) => self.history[idx + 1..].to_vec(),
            _ => self.history.clone(),
        }
    }
}

struct InFlight {
    workflow_id: String,
    pages: Vec<Vec<Event>>,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    executions: BTreeMap<String, Execution>,
    tasks: HashMap<String, InFlight>,
    submissions: Vec<Submission>,
    next_token: u64,
    pages_served: usize,
}

pub struct InMemoryGateway {
    options: InMemoryOptions,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::with_options(InMemoryOptions::default())
    }

    pub fn with_options(options: InMemoryOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Start an execution on the `"default"` task list.
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        version: &str,
        input: impl Into<String>,
    ) -> Result<(), GatewayError> {
        self.start_workflow_on("default", workflow_id, name, version, input).await
    }

    pub async fn start_workflow_on(
        &self,
        task_list: &str,
        workflow_id: &str,
        name: &str,
        version: &str,
        input: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        if inner.executions.contains_key(workflow_id) {
            return Err(GatewayError::permanent(
                "start_workflow",
                format!("workflow already exists: {workflow_id}"),
            ));
        }
        let mut exec = Execution {
            name: name.to_string(),
            version: version.to_string(),
            task_list: task_list.to_string(),
            history: Vec::new(),
            next_event_id: 1,
            last_boundary: None,
            last_context: None,
            status: ExecutionStatus::Running,
            needs_decision: false,
            in_flight: None,
            held: Vec::new(),
            open_calls: BTreeMap::new(),
        };
        exec.record(Event::Started { input: input.into() });
        inner.executions.insert(workflow_id.to_string(), exec);
        drop(inner);
        tracing::debug!(target: "replayflow::providers::in_memory", workflow_id, name, version, "workflow started");
        self.notify.notify_waiters();
        Ok(())
    }

    pub async fn complete_call(
        &self,
        workflow_id: &str,
        call_id: impl Into<CallId>,
        result: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let result = result.into();
        self.resolve_call(workflow_id, call_id.into(), "complete_call", move |scheduled_event_id| {
            Event::Completed {
                scheduled_event_id,
                result,
            }
        })
        .await
    }

    pub async fn fail_call(
        &self,
        workflow_id: &str,
        call_id: impl Into<CallId>,
        reason: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let reason = reason.into();
        self.resolve_call(workflow_id, call_id.into(), "fail_call", move |scheduled_event_id| {
            Event::Failed {
                scheduled_event_id,
                reason,
            }
        })
        .await
    }

    pub async fn time_out_call(&self, workflow_id: &str, call_id: impl Into<CallId>) -> Result<(), GatewayError> {
        self.resolve_call(workflow_id, call_id.into(), "time_out_call", |scheduled_event_id| {
            Event::TimedOut { scheduled_event_id }
        })
        .await
    }

    /// Append a bookkeeping event the decider should ignore.
    pub async fn record_marker(&self, workflow_id: &str, kind: impl Into<String>) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        let exec = Self::running_execution(&mut inner, workflow_id, "record_marker")?;
        exec.record(Event::Other {
            event_id: 0,
            kind: kind.into(),
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Calls scheduled and not yet resolved, in call order ("2" before "10").
    pub async fn open_calls(&self, workflow_id: &str) -> Vec<SchedulingRequest> {
        let inner = self.inner.lock().await;
        let mut calls: Vec<SchedulingRequest> = inner
            .executions
            .get(workflow_id)
            .map(|e| e.open_calls.values().map(|(_, req)| req.clone()).collect())
            .unwrap_or_default();
        // Decimal ids without leading zeros: shorter is smaller.
        calls.sort_by(|a, b| {
            let (a, b) = (a.call_id.as_str(), b.call_id.as_str());
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        });
        calls
    }

    pub async fn status(&self, workflow_id: &str) -> Option<ExecutionStatus> {
        self.inner.lock().await.executions.get(workflow_id).map(|e| e.status.clone())
    }

    pub async fn history(&self, workflow_id: &str) -> Vec<Event> {
        let inner = self.inner.lock().await;
        inner
            .executions
            .get(workflow_id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().await.submissions.clone()
    }

    /// History pages handed out so far, counting the first page of each task.
    pub async fn pages_served(&self) -> usize {
        self.inner.lock().await.pages_served
    }

    /// Poll `status` until the execution is closed or `timeout` passes.
    pub async fn wait_until_closed(&self, workflow_id: &str, timeout: Duration) -> Option<ExecutionStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status(workflow_id).await {
                Some(ExecutionStatus::Running) | None => {}
                closed => return closed,
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn resolve_call(
        &self,
        workflow_id: &str,
        call_id: CallId,
        operation: &str,
        make: impl FnOnce(EventId) -> Event,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        let exec = Self::running_execution(&mut inner, workflow_id, operation)?;
        let Some((scheduled_event_id, _)) = exec.open_calls.remove(&call_id) else {
            return Err(GatewayError::permanent(
                operation,
                format!("call {call_id} is not open in {workflow_id}"),
            ));
        };
        exec.record(make(scheduled_event_id));
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    fn running_execution<'a>(
        inner: &'a mut Inner,
        workflow_id: &str,
        operation: &str,
    ) -> Result<&'a mut Execution, GatewayError> {
        match inner.executions.get_mut(workflow_id) {
            Some(exec) if exec.status == ExecutionStatus::Running => Ok(exec),
            Some(_) => Err(GatewayError::permanent(operation, format!("workflow {workflow_id} is closed"))),
            None => Err(GatewayError::permanent(operation, format!("unknown workflow {workflow_id}"))),
        }
    }

    /// Take back tasks whose decision deadline has passed.
    fn reclaim_expired(inner: &mut Inner, now: Instant) {
        let expired: Vec<String> = inner
            .tasks
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            let Some(task) = inner.tasks.remove(&token) else {
                continue;
            };
            let Some(exec) = inner.executions.get_mut(&task.workflow_id) else {
                continue;
            };
            if exec.in_flight.as_deref() != Some(token.as_str()) {
                continue;
            }
            exec.in_flight = None;
            for event in std::mem::take(&mut exec.held) {
                exec.append(event);
            }
            exec.needs_decision = exec.status == ExecutionStatus::Running;
            tracing::debug!(
                target: "replayflow::providers::in_memory",
                task_token = %token,
                workflow_id = %task.workflow_id,
                "decision timed out; task will be redelivered"
            );
        }
    }

    fn next_expiry(inner: &Inner) -> Option<Instant> {
        inner.tasks.values().map(|t| t.deadline).min()
    }

    fn take_task(&self, inner: &mut Inner, task_list: &str) -> Option<DecisionTask> {
        let now = Instant::now();
        Self::reclaim_expired(inner, now);
        let workflow_id = inner
            .executions
            .iter()
            .find(|(_, e)| {
                e.task_list == task_list
                    && e.status == ExecutionStatus::Running
                    && e.needs_decision
                    && e.in_flight.is_none()
            })
            .map(|(id, _)| id.clone())?;

        inner.next_token += 1;
        let token = format!("{workflow_id}#{}", inner.next_token);
        let exec = inner.executions.get_mut(&workflow_id)?;
        exec.needs_decision = false;
        exec.in_flight = Some(token.clone());

        let mut events = exec.delivered_events(self.options.delivery);
        if self.options.order == HistoryOrder::ReverseChronological {
            events.reverse();
        }
        let mut pages: Vec<Vec<Event>> = events
            .chunks(self.options.page_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        if pages.is_empty() {
            pages.push(Vec::new());
        }
        let previous_context = match self.options.delivery {
            HistoryDelivery::Full => None,
            HistoryDelivery::SinceBoundary => exec.last_context.clone(),
        };
        let task = DecisionTask {
            task_token: token.clone(),
            workflow_id: workflow_id.clone(),
            workflow_name: exec.name.clone(),
            workflow_version: exec.version.clone(),
            previous_context,
            events: pages[0].clone(),
            next_page_token: (pages.len() > 1).then(|| "1".to_string()),
        };
        inner.pages_served += 1;
        inner.tasks.insert(
            token,
            InFlight {
                workflow_id,
                pages,
                deadline: now + self.options.decision_timeout,
            },
        );
        Some(task)
    }

    /// Close out the task named by `task_token`, returning its execution.
    fn finish_task<'a>(
        inner: &'a mut Inner,
        task_token: &str,
        operation: &str,
    ) -> Result<(String, &'a mut Execution), GatewayError> {
        let Some(task) = inner.tasks.remove(task_token) else {
            return Err(GatewayError::permanent(operation, format!("unknown task token {task_token}")));
        };
        let exec = inner
            .executions
            .get_mut(&task.workflow_id)
            .ok_or_else(|| GatewayError::permanent(operation, format!("unknown workflow {}", task.workflow_id)))?;
        exec.in_flight = None;
        Ok((task.workflow_id, exec))
    }
}

#[async_trait::async_trait]
impl TaskGateway for InMemoryGateway {
    async fn poll_decision(&self, task_list: &str, identity: &str) -> Result<Option<DecisionTask>, GatewayError> {
        let deadline = Instant::now() + self.options.poll_timeout;
        loop {
            let notified = self.notify.notified();
            let wake = {
                let mut inner = self.inner.lock().await;
                if let Some(task) = self.take_task(&mut inner, task_list) {
                    tracing::debug!(
                        target: "replayflow::providers::in_memory",
                        task_token = %task.task_token,
                        workflow_id = %task.workflow_id,
                        identity,
                        "decision task handed out"
                    );
                    return Ok(Some(task));
                }
                Self::next_expiry(&inner).map_or(deadline, |expiry| expiry.min(deadline))
            };
            if tokio::time::timeout_at(wake, notified).await.is_err() && Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn next_page(&self, task_token: &str, page_token: &str) -> Result<EventPage, GatewayError> {
        let mut inner = self.inner.lock().await;
        let index: usize = page_token
            .parse()
            .map_err(|_| GatewayError::permanent("next_page", format!("bad page token {page_token}")))?;
        let Some(task) = inner.tasks.get(task_token) else {
            return Err(GatewayError::permanent("next_page", format!("unknown task token {task_token}")));
        };
        let Some(events) = task.pages.get(index).cloned() else {
            return Err(GatewayError::permanent("next_page", format!("no page {index} for {task_token}")));
        };
        let next_page_token = (index + 1 < task.pages.len()).then(|| (index + 1).to_string());
        inner.pages_served += 1;
        Ok(EventPage {
            events,
            next_page_token,
        })
    }

    async fn submit_decision(
        &self,
        task_token: &str,
        requests: Vec<SchedulingRequest>,
        context: String,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;

        // Reject before touching the history so a bad decision leaves no trace.
        if let Some(task) = inner.tasks.get(task_token)
            && let Some(exec) = inner.executions.get(&task.workflow_id)
            && let Some(dup) = requests.iter().find(|r| exec.open_calls.contains_key(&r.call_id))
        {
            return Err(GatewayError::permanent(
                "submit_decision",
                format!("call {} is already open", dup.call_id),
            ));
        }

        let (workflow_id, exec) = Self::finish_task(&mut inner, task_token, "submit_decision")?;
        exec.append(Event::DecisionBoundary {
            event_id: 0,
            context: Some(context.clone()),
        });
        exec.last_context = Some(context.clone());
        for req in &requests {
            let scheduled = exec.append(Event::Scheduled {
                event_id: 0,
                call_id: req.call_id.clone(),
            });
            exec.open_calls.insert(req.call_id.clone(), (scheduled, req.clone()));
        }
        let held = std::mem::take(&mut exec.held);
        exec.needs_decision = !held.is_empty();
        for event in held {
            exec.append(event);
        }
        inner.submissions.push(Submission {
            workflow_id,
            requests,
            context,
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn complete_workflow(&self, task_token: &str, result: String) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        let (_, exec) = Self::finish_task(&mut inner, task_token, "complete_workflow")?;
        exec.status = ExecutionStatus::Completed { result };
        exec.held.clear();
        Ok(())
    }

    async fn fail_workflow(&self, task_token: &str, reason: String) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        let (_, exec) = Self::finish_task(&mut inner, task_token, "fail_workflow")?;
        exec.status = ExecutionStatus::Failed { reason };
        exec.held.clear();
        Ok(())
    }
}
