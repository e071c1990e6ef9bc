use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::CallId;
use crate::_typed_codec::{Codec, Json, to_json_value};

/// Why a call could not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityErrorKind {
    /// The remote work reported failure.
    Failed,
    /// The remote work timed out and the retry budget is spent.
    TimedOut,
    /// The result arrived but could not be decoded into the requested type.
    Decode,
}

/// Failure of one call, as seen by coordination code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityError {
    pub call_id: CallId,
    pub activity: String,
    pub kind: ActivityErrorKind,
    pub reason: String,
}

impl ActivityError {
    pub(crate) fn failed(call_id: CallId, activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            call_id,
            activity: activity.into(),
            kind: ActivityErrorKind::Failed,
            reason: reason.into(),
        }
    }

    pub(crate) fn timed_out(call_id: CallId, activity: impl Into<String>) -> Self {
        let activity = activity.into();
        Self {
            reason: format!("activity '{activity}' (call {call_id}) timed out and exhausted its retries"),
            call_id,
            activity,
            kind: ActivityErrorKind::TimedOut,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ActivityErrorKind::TimedOut
    }
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActivityErrorKind::Failed => {
                write!(f, "activity '{}' (call {}) failed: {}", self.activity, self.call_id, self.reason)
            }
            ActivityErrorKind::TimedOut => f.write_str(&self.reason),
            ActivityErrorKind::Decode => write!(
                f,
                "activity '{}' (call {}) returned an undecodable result: {}",
                self.activity, self.call_id, self.reason
            ),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Outcome of one invocation in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Requested (now or earlier) or deferred behind a dependency.
    Pending,
    /// Raw serialized result.
    Ready(String),
    Errored(ActivityError),
}

/// Handle to one invocation.
///
/// The state is fixed when the call is made; polling never consults the
/// history again. Awaiting a pending handle suspends the whole pass.
#[must_use = "a call is only observed through its future"]
pub struct DurableFuture<T = Value> {
    call_id: CallId,
    activity: String,
    state: CallState,
    _out: PhantomData<fn() -> T>,
}

impl<T> Clone for DurableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            call_id: self.call_id.clone(),
            activity: self.activity.clone(),
            state: self.state.clone(),
            _out: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DurableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableFuture")
            .field("call_id", &self.call_id)
            .field("activity", &self.activity)
            .field("state", &self.state)
            .finish()
    }
}

impl<T> DurableFuture<T> {
    pub(crate) fn new(call_id: CallId, activity: impl Into<String>, state: CallState) -> Self {
        Self {
            call_id,
            activity: activity.into(),
            state,
            _out: PhantomData,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, CallState::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, CallState::Ready(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.state, CallState::Errored(_))
    }

    /// Reinterpret the result type.
    pub fn typed<U>(self) -> DurableFuture<U> {
        DurableFuture {
            call_id: self.call_id,
            activity: self.activity,
            state: self.state,
            _out: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> DurableFuture<T> {
    /// Non-suspending peek: `None` while pending.
    pub fn result(&self) -> Option<Result<T, ActivityError>> {
        match &self.state {
            CallState::Pending => None,
            CallState::Ready(raw) => Some(self.decode(raw)),
            CallState::Errored(err) => Some(Err(err.clone())),
        }
    }

    fn decode(&self, raw: &str) -> Result<T, ActivityError> {
        Json::decode::<T>(raw).map_err(|e| ActivityError {
            call_id: self.call_id.clone(),
            activity: self.activity.clone(),
            kind: ActivityErrorKind::Decode,
            reason: e,
        })
    }
}

impl<T: DeserializeOwned> Future for DurableFuture<T> {
    type Output = Result<T, ActivityError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.result() {
            Some(out) => Poll::Ready(out),
            None => Poll::Pending,
        }
    }
}

/// One positional argument of an invocation.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    /// The result of another call; the dependent call is deferred until it resolves.
    Future { call_id: CallId, state: CallState },
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Value(Value::String(v.to_string()))
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Value(Value::String(v))
    }
}

impl<T> From<&DurableFuture<T>> for Arg {
    fn from(f: &DurableFuture<T>) -> Self {
        Arg::Future {
            call_id: f.call_id.clone(),
            state: f.state.clone(),
        }
    }
}

impl<T> From<DurableFuture<T>> for Arg {
    fn from(f: DurableFuture<T>) -> Self {
        Arg::Future {
            call_id: f.call_id,
            state: f.state,
        }
    }
}

pub(crate) enum ArgResolution {
    Pending,
    Errored(ActivityError),
    Ready(Vec<Value>),
}

/// Pending dependencies win over errored ones, so a call waits for all of its
/// inputs before failing fast.
pub(crate) fn resolve_args(args: &[Arg]) -> ArgResolution {
    let is_pending = |a: &Arg| matches!(a, Arg::Future { state: CallState::Pending, .. });
    if args.iter().any(is_pending) {
        return ArgResolution::Pending;
    }
    let errored = args.iter().find_map(|a| match a {
        Arg::Future {
            state: CallState::Errored(err),
            ..
        } => Some(err.clone()),
        _ => None,
    });
    if let Some(err) = errored {
        return ArgResolution::Errored(err);
    }
    let values = args
        .iter()
        .map(|a| match a {
            Arg::Value(v) => v.clone(),
            Arg::Future {
                state: CallState::Ready(raw),
                ..
            } => to_json_value(raw),
            Arg::Future { .. } => Value::Null,
        })
        .collect();
    ArgResolution::Ready(values)
}

/// Ready once every child is resolved; outputs keep the order of the children.
pub struct JoinFuture<T = Value> {
    children: Vec<DurableFuture<T>>,
}

impl<T> JoinFuture<T> {
    pub fn new(children: Vec<DurableFuture<T>>) -> Self {
        Self { children }
    }
}

impl<T: DeserializeOwned> Future for JoinFuture<T> {
    type Output = Vec<Result<T, ActivityError>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.children.iter().any(|c| c.is_pending()) {
            return Poll::Pending;
        }
        let outputs = self.children.iter().filter_map(|c| c.result()).collect();
        Poll::Ready(outputs)
    }
}
