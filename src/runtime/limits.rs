//! Runtime limits and constants.
//!
//! Collect all hard limits in one place so they're easy to find, document,
//! and reference from both the decision turn and the host loop.

use std::time::Duration;

use crate::options::ActivityOptions;

/// Maximum size in bytes of the serialized context submitted with a decision.
///
/// The hosted task service rejects execution contexts above 32 KiB; a turn
/// whose encoded state exceeds it fails the workflow with an
/// `Infrastructure` error instead of submitting.
pub const MAX_CONTEXT_BYTES: usize = 32 * 1024;

/// Reschedules allowed after a timeout when neither a scope nor the call
/// site sets a retry budget.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Start-to-close timeout used when nothing more specific is configured.
pub const DEFAULT_START_TO_CLOSE: Duration = Duration::from_secs(5 * 60);

/// Engine-wide fallback at the bottom of option resolution.
pub fn engine_default_options() -> ActivityOptions {
    ActivityOptions::default()
        .with_start_to_close_timeout(DEFAULT_START_TO_CLOSE)
        .with_retry(DEFAULT_RETRY_BUDGET)
}
