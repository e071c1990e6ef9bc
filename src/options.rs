//! Hierarchical activity options.
//!
//! Options are resolved field by field: an unset field inherits from the
//! enclosing scope, then from the invocation site's static defaults, then from
//! the engine-wide fallback in [`crate::runtime::limits`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::WorkflowContext;

/// Per-invocation configuration. `None` means "inherit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub heartbeat_timeout: Option<Duration>,
    pub schedule_to_close_timeout: Option<Duration>,
    pub schedule_to_start_timeout: Option<Duration>,
    pub start_to_close_timeout: Option<Duration>,
    /// Target queue the work is posted to.
    pub task_list: Option<String>,
    /// How many times a timed-out call is rescheduled before it counts as failed.
    pub retry: Option<u32>,
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = Some(timeout);
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Keep every field set on `self`; take the rest from `fallback`.
    pub fn fill_missing(&self, fallback: &ActivityOptions) -> ActivityOptions {
        ActivityOptions {
            heartbeat_timeout: self.heartbeat_timeout.or(fallback.heartbeat_timeout),
            schedule_to_close_timeout: self.schedule_to_close_timeout.or(fallback.schedule_to_close_timeout),
            schedule_to_start_timeout: self.schedule_to_start_timeout.or(fallback.schedule_to_start_timeout),
            start_to_close_timeout: self.start_to_close_timeout.or(fallback.start_to_close_timeout),
            task_list: self.task_list.clone().or_else(|| fallback.task_list.clone()),
            retry: self.retry.or(fallback.retry),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ActivityOptions::default()
    }
}

/// Stack of merged option scopes. The bottom entry is always present and empty.
#[derive(Debug, Clone)]
pub struct OptionStack {
    scopes: Vec<ActivityOptions>,
}

impl Default for OptionStack {
    fn default() -> Self {
        Self {
            scopes: vec![ActivityOptions::default()],
        }
    }
}

impl OptionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a nested scope: explicit fields of `options` win, missing ones
    /// come from the current top.
    pub fn push(&mut self, options: &ActivityOptions) {
        let merged = options.fill_missing(self.top());
        self.scopes.push(merged);
    }

    /// Leave the innermost scope. The bottom entry is never popped.
    pub fn pop(&mut self) -> Option<ActivityOptions> {
        if self.scopes.len() > 1 { self.scopes.pop() } else { None }
    }

    pub fn top(&self) -> &ActivityOptions {
        // The bottom entry is never removed
        &self.scopes[self.scopes.len() - 1]
    }

    /// Nested scopes currently active (the bottom entry is not counted).
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Options for an actual invocation: innermost scope, then the call
    /// site's static defaults, then the engine-wide fallback.
    pub fn resolve(&self, site_defaults: &ActivityOptions, engine_defaults: &ActivityOptions) -> ActivityOptions {
        self.top().fill_missing(site_defaults).fill_missing(engine_defaults)
    }
}

/// Guard returned by [`WorkflowContext::options_scope`]; pops its scope when dropped.
#[must_use = "the scope is left as soon as the guard is dropped"]
pub struct OptionScope {
    ctx: WorkflowContext,
    depth: usize,
}

impl OptionScope {
    pub(crate) fn enter(ctx: WorkflowContext, options: &ActivityOptions) -> Self {
        let depth = ctx.push_options(options);
        Self { ctx, depth }
    }

    /// Depth of this scope in the stack (1 = outermost nested scope).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for OptionScope {
    fn drop(&mut self) {
        self.ctx.pop_options(self.depth);
    }
}
