use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::codec::CallContext;
use crate::futures::{ActivityError, Arg, ArgResolution, CallState, DurableFuture, JoinFuture, resolve_args};
use crate::options::{ActivityOptions, OptionScope, OptionStack};
use crate::providers::SchedulingRequest;
use crate::runtime::registry::{ActivityProxy, ActivityRegistry};
use crate::state::{CallStatus, WorkflowState};
use crate::_typed_codec::{Codec, Json};
use crate::{AppErrorKind, CallId, ErrorDetails};

struct CtxInner {
    workflow_name: String,
    workflow_version: String,
    state: WorkflowState,
    activities: ActivityRegistry,
    options: OptionStack,
    engine_defaults: ActivityOptions,
    next_call: u64,
    requests: Vec<SchedulingRequest>,
    requested: BTreeSet<CallId>,
    fatal: Option<ErrorDetails>,
    /// Log sites reached so far in this pass.
    log_sites: u64,
}

/// What one pass produced, drained by the decision turn.
pub(crate) struct PassOutcome {
    pub state: WorkflowState,
    pub requests: Vec<SchedulingRequest>,
    pub fatal: Option<ErrorDetails>,
    pub calls_issued: u64,
}

impl CtxInner {
    fn allocate_call_id(&mut self) -> CallId {
        let id = CallId::from_index(self.next_call);
        self.next_call += 1;
        id
    }

    /// Decide the fate of one invocation against the replayed state.
    fn invoke(&mut self, proxy: &ActivityProxy, args: &[Arg], user: Option<String>) -> (CallId, CallState) {
        let call_id = self.allocate_call_id();

        let values = match resolve_args(args) {
            ArgResolution::Pending => {
                debug!(
                    workflow = %self.workflow_name,
                    call_id = %call_id,
                    activity = %proxy.name(),
                    "call deferred on pending dependency"
                );
                return (call_id, CallState::Pending);
            }
            ArgResolution::Errored(err) => {
                debug!(
                    workflow = %self.workflow_name,
                    call_id = %call_id,
                    activity = %proxy.name(),
                    dependency = %err.call_id,
                    "dependency failed; not scheduling"
                );
                let state = self.surface(proxy, err);
                return (call_id, state);
            }
            ArgResolution::Ready(values) => values,
        };

        let resolved = self.options.resolve(proxy.defaults(), &self.engine_defaults);

        let state = match self.state.status(&call_id) {
            CallStatus::TimedOut => {
                let (retries_left, user) = self.recorded_context(&call_id, &resolved, user);
                if retries_left > 0 {
                    debug!(
                        workflow = %self.workflow_name,
                        call_id = %call_id,
                        activity = %proxy.name(),
                        retries_left,
                        "rescheduling timed-out call"
                    );
                    self.schedule(proxy, &call_id, values, resolved, retries_left - 1, user);
                    CallState::Pending
                } else {
                    let err = ActivityError::timed_out(call_id.clone(), proxy.name());
                    self.surface(proxy, err)
                }
            }
            CallStatus::Completed(result) => CallState::Ready(result.to_string()),
            CallStatus::Failed(reason) => {
                let err = ActivityError::failed(call_id.clone(), proxy.name(), reason);
                self.surface(proxy, err)
            }
            CallStatus::Running => CallState::Pending,
            CallStatus::NotSeen => {
                let retries = resolved.retry.unwrap_or(0);
                self.schedule(proxy, &call_id, values, resolved, retries, user);
                CallState::Pending
            }
        };
        (call_id, state)
    }

    /// Retry budget and user data recorded when the call was last queued.
    fn recorded_context(
        &self,
        call_id: &CallId,
        resolved: &ActivityOptions,
        user: Option<String>,
    ) -> (u32, Option<String>) {
        let fallback = resolved.retry.unwrap_or(0);
        match self.state.call_context.get(call_id).map(|raw| CallContext::decode(raw)) {
            Some(Ok(recorded)) => (recorded.retries_left, recorded.user.or(user)),
            Some(Err(e)) => {
                warn!(
                    workflow = %self.workflow_name,
                    call_id = %call_id,
                    error = %e,
                    "unreadable call context; using configured retry budget"
                );
                (fallback, user)
            }
            None => (fallback, user),
        }
    }

    fn schedule(
        &mut self,
        proxy: &ActivityProxy,
        call_id: &CallId,
        values: Vec<Value>,
        options: ActivityOptions,
        retries_left: u32,
        user: Option<String>,
    ) {
        if !self.requested.insert(call_id.clone()) {
            self.record_fatal(ErrorDetails::Infrastructure {
                operation: "schedule".to_string(),
                message: format!("call {call_id} was requested twice in one pass"),
            });
            return;
        }
        let input = match serde_json::to_string(&Value::Array(values)) {
            Ok(s) => s,
            Err(e) => {
                self.record_fatal(ErrorDetails::Infrastructure {
                    operation: "encode_input".to_string(),
                    message: format!("call {call_id}: {e}"),
                });
                return;
            }
        };
        let context = match CallContext::new(retries_left, user).encode() {
            Ok(s) => s,
            Err(e) => {
                self.record_fatal(ErrorDetails::Infrastructure {
                    operation: "encode_call_context".to_string(),
                    message: format!("call {call_id}: {e}"),
                });
                return;
            }
        };

        debug!(
            workflow = %self.workflow_name,
            call_id = %call_id,
            activity = %proxy.name(),
            version = %proxy.version(),
            retries_left,
            "requesting schedule"
        );
        self.state.call_context.insert(call_id.clone(), context.clone());
        self.requests.push(SchedulingRequest {
            call_id: call_id.clone(),
            name: proxy.name().to_string(),
            version: proxy.version().to_string(),
            input,
            options,
            context,
        });
    }

    /// Hand an error to the coordination code, or make it fatal for auto-handled sites.
    fn surface(&mut self, proxy: &ActivityProxy, err: ActivityError) -> CallState {
        if !proxy.manual_errors() {
            let kind = if err.is_timeout() {
                AppErrorKind::ActivityTimedOut
            } else {
                AppErrorKind::ActivityFailed
            };
            self.record_fatal(ErrorDetails::Application {
                kind,
                message: err.to_string(),
            });
        }
        CallState::Errored(err)
    }

    fn record_fatal(&mut self, details: ErrorDetails) {
        if self.fatal.is_none() {
            debug!(workflow = %self.workflow_name, reason = %details, "recording fatal failure");
            self.fatal = Some(details);
        }
    }
}

/// Invocation surface handed to coordination code for one pass.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_name: impl Into<String>,
        workflow_version: impl Into<String>,
        state: WorkflowState,
        activities: ActivityRegistry,
        engine_defaults: ActivityOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner {
                workflow_name: workflow_name.into(),
                workflow_version: workflow_version.into(),
                state,
                activities,
                options: OptionStack::new(),
                engine_defaults,
                next_call: 0,
                requests: Vec::new(),
                requested: BTreeSet::new(),
                fatal: None,
                log_sites: 0,
            })),
        }
    }

    // A panic in coordination code poisons the lock; the state behind it is
    // still valid for reporting the failure.
    fn lock(&self) -> MutexGuard<'_, CtxInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn workflow_name(&self) -> String {
        self.lock().workflow_name.clone()
    }

    pub fn workflow_version(&self) -> String {
        self.lock().workflow_version.clone()
    }

    /// Input captured from the initiating event.
    pub fn input(&self) -> String {
        self.lock().state.input.clone().unwrap_or_default()
    }

    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, String> {
        Json::decode(&self.input())
    }

    pub fn global_context(&self) -> Option<String> {
        self.lock().state.global_context.clone()
    }

    /// Replace the user context persisted with this decision.
    pub fn set_global_context(&self, value: impl Into<String>) {
        self.lock().state.global_context = Some(value.into());
    }

    /// User data attached when `call_id` was queued.
    pub fn call_context(&self, call_id: &CallId) -> Option<String> {
        let inner = self.lock();
        let raw = inner.state.call_context.get(call_id)?;
        CallContext::decode(raw).ok().and_then(|c| c.user)
    }

    /// Bound proxy for a registered activity.
    pub fn activity(&self, name: &str) -> Result<ActivityHandle, String> {
        let proxy = self.lock().activities.get(name);
        match proxy {
            Some(proxy) => Ok(ActivityHandle { ctx: self.clone(), proxy }),
            None => Err(format!("unknown activity '{name}' in workflow '{}'", self.workflow_name())),
        }
    }

    /// Enter a nested option scope; it is left when the guard drops.
    pub fn options_scope(&self, options: ActivityOptions) -> OptionScope {
        OptionScope::enter(self.clone(), &options)
    }

    /// Run `f` inside a nested option scope.
    pub fn with_options<R>(&self, options: ActivityOptions, f: impl FnOnce(&WorkflowContext) -> R) -> R {
        let _scope = self.options_scope(options);
        f(self)
    }

    /// Options a call to `proxy` made right now would be scheduled with.
    pub fn resolved_options(&self, proxy: &ActivityProxy) -> ActivityOptions {
        let inner = self.lock();
        inner.options.resolve(proxy.defaults(), &inner.engine_defaults)
    }

    pub fn join<T>(&self, futures: Vec<DurableFuture<T>>) -> JoinFuture<T> {
        JoinFuture::new(futures)
    }

    /// Count one workflow log site; true if no earlier pass reached it.
    ///
    /// Replays run the same code in the same order, so the n-th site of this
    /// pass is the n-th site of every earlier pass that got that far.
    pub fn should_log(&self) -> bool {
        let mut inner = self.lock();
        let site = inner.log_sites;
        inner.log_sites += 1;
        site >= inner.state.log_sites
    }

    /// Invocations issued so far in this pass.
    pub fn calls_issued(&self) -> u64 {
        self.lock().next_call
    }

    pub(crate) fn push_options(&self, options: &ActivityOptions) -> usize {
        let mut inner = self.lock();
        inner.options.push(options);
        inner.options.depth()
    }

    pub(crate) fn pop_options(&self, depth: usize) {
        let mut inner = self.lock();
        while inner.options.depth() >= depth && inner.options.pop().is_some() {}
    }

    pub(crate) fn take_outcome(&self) -> PassOutcome {
        let mut inner = self.lock();
        inner.state.log_sites = inner.state.log_sites.max(inner.log_sites);
        PassOutcome {
            state: std::mem::take(&mut inner.state),
            requests: std::mem::take(&mut inner.requests),
            fatal: inner.fatal.take(),
            calls_issued: inner.next_call,
        }
    }

    fn invoke(&self, proxy: &ActivityProxy, args: Vec<Arg>, user: Option<String>) -> DurableFuture {
        let (call_id, state) = self.lock().invoke(proxy, &args, user);
        DurableFuture::new(call_id, proxy.name(), state)
    }
}

/// An [`ActivityProxy`] bound to the current pass.
#[derive(Clone)]
pub struct ActivityHandle {
    ctx: WorkflowContext,
    proxy: Arc<ActivityProxy>,
}

impl ActivityHandle {
    pub fn proxy(&self) -> &ActivityProxy {
        &self.proxy
    }

    /// Invoke with positional arguments; futures among them become dependencies.
    pub fn call(&self, args: impl IntoIterator<Item = Arg>) -> DurableFuture {
        self.ctx.invoke(&self.proxy, args.into_iter().collect(), None)
    }

    /// Like [`call`](Self::call), attaching opaque side data to the call.
    pub fn call_with_context(&self, args: impl IntoIterator<Item = Arg>, user: impl Into<String>) -> DurableFuture {
        self.ctx.invoke(&self.proxy, args.into_iter().collect(), Some(user.into()))
    }

    pub fn call_as<T: DeserializeOwned>(&self, args: impl IntoIterator<Item = Arg>) -> DurableFuture<T> {
        self.call(args).typed()
    }
}
