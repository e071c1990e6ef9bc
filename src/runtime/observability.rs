//! Structured logging setup and decider counters.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format for development (with all fields)
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

/// Logging configuration.
///
/// ```rust,no_run
/// # use replayflow::runtime::{LogFormat, ObservabilityConfig};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
///     ..Default::default()
/// };
/// replayflow::runtime::init_logging(&config).ok();
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level for this crate's targets when `RUST_LOG` is unset (e.g. "info", "debug").
    pub log_level: String,
    /// Attached to the startup event so aggregated logs can be told apart.
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
            service_name: "replayflow".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,replayflow={level}")
}

/// Install a global subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Fails if a global
/// subscriber is already installed; callers that may initialize twice can
/// ignore the error.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}"))?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}"))?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}"))?,
    }

    tracing::info!(service = %config.service_name, format = ?config.log_format, "logging initialized");
    Ok(())
}

/// Snapshot of decider counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub decisions_submitted: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub protocol_violations: u64,
    pub poll_errors: u64,
    pub report_errors: u64,
    pub requests_scheduled: u64,
}

#[derive(Debug, Default)]
pub struct DeciderMetrics {
    decisions_submitted: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
    protocol_violations: AtomicU64,
    poll_errors: AtomicU64,
    report_errors: AtomicU64,
    requests_scheduled: AtomicU64,
}

impl DeciderMetrics {
    pub(crate) fn record_decision(&self, requests: usize) {
        self.decisions_submitted.fetch_add(1, Ordering::Relaxed);
        self.requests_scheduled.fetch_add(requests as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, details: &crate::ErrorDetails) {
        self.workflows_failed.fetch_add(1, Ordering::Relaxed);
        if details.is_protocol_violation() {
            self.protocol_violations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_report_error(&self) {
        self.report_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_submitted: self.decisions_submitted.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            report_errors: self.report_errors.load(Ordering::Relaxed),
            requests_scheduled: self.requests_scheduled.load(Ordering::Relaxed),
        }
    }
}
