// macros only; no direct imports needed

/// Info-level event that stays quiet while a pass is re-reading decisions
/// recorded by earlier passes.
#[macro_export]
macro_rules! workflow_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.should_log() {
            ::tracing::info!(workflow = %$ctx.workflow_name(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.should_log() {
            ::tracing::warn!(workflow = %$ctx.workflow_name(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.should_log() {
            ::tracing::error!(workflow = %$ctx.workflow_name(), $($arg)+);
        }
    }};
}
