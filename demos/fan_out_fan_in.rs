//! Fan-Out/Fan-In Pattern Example
//!
//! One profile lookup per user runs in parallel, then a summary call that
//! depends on every lookup. The in-memory task service stands in for the
//! hosted one and a small loop plays the activity worker.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! Run with: `cargo run --example fan_out_fan_in`

use replayflow::providers::in_memory::{ExecutionStatus, InMemoryGateway};
use replayflow::providers::SchedulingRequest;
use replayflow::runtime::ObservabilityConfig;
use replayflow::{
    ActivityProxy, ActivityRegistry, Arg, Decider, DeciderOptions, WorkflowContext, WorkflowRegistry, workflow_info,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug)]
struct User {
    id: u32,
    name: String,
}

async fn onboarding(ctx: WorkflowContext, _input: String) -> Result<String, String> {
    let users: Vec<Value> = ctx.input_as()?;
    workflow_info!(ctx, users = users.len(), "fanning out profile lookups");

    let fetch = ctx.activity("FetchProfile")?;
    let profiles: Vec<_> = users.into_iter().map(|u| fetch.call([u.into()])).collect();

    let summary = ctx.activity("Summarize")?.call_as::<String>(profiles.iter().map(Arg::from));
    let summary = summary.await.map_err(|e| e.to_string())?;
    workflow_info!(ctx, "all profiles summarized");
    Ok(summary)
}

/// What an activity worker would compute for `req`.
fn run_activity(req: &SchedulingRequest) -> Result<String, String> {
    let args: Vec<Value> = serde_json::from_str(&req.input).map_err(|e| e.to_string())?;
    match req.name.as_str() {
        "FetchProfile" => {
            let user: User = serde_json::from_value(args[0].clone()).map_err(|e| e.to_string())?;
            Ok(serde_json::json!({
                "user_id": user.id,
                "email": format!("{}@example.com", user.name.to_lowercase()),
            })
            .to_string())
        }
        "Summarize" => {
            let emails: Vec<&str> = args.iter().filter_map(|p| p["email"].as_str()).collect();
            serde_json::to_string(&format!("welcomed {}", emails.join(", "))).map_err(|e| e.to_string())
        }
        other => Err(format!("no worker for {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let activities = ActivityRegistry::builder()
        .register(ActivityProxy::builder("FetchProfile", "1").retry(2).build())
        .register(
            ActivityProxy::builder("Summarize", "1")
                .start_to_close(Duration::from_secs(30))
                .build(),
        )
        .build_result()?;
    let workflows = WorkflowRegistry::builder()
        .register("Onboarding", "1", activities, onboarding)
        .build_result()?;

    let gateway = Arc::new(InMemoryGateway::new());
    let options = DeciderOptions {
        observability: Some(ObservabilityConfig::default()),
        ..Default::default()
    };
    let decider = Decider::start(gateway.clone(), workflows, options).await;

    let users = serde_json::json!([
        {"id": 1, "name": "Ada"},
        {"id": 2, "name": "Grace"},
        {"id": 3, "name": "Linus"},
    ]);
    gateway
        .start_workflow("signup-batch-1", "Onboarding", "1", users.to_string())
        .await?;

    // Activity worker: resolve whatever the decider has scheduled.
    let worker_gateway = gateway.clone();
    let worker = tokio::spawn(async move {
        loop {
            for req in worker_gateway.open_calls("signup-batch-1").await {
                let resolved = match run_activity(&req) {
                    Ok(result) => worker_gateway.complete_call("signup-batch-1", req.call_id.clone(), result).await,
                    Err(reason) => worker_gateway.fail_call("signup-batch-1", req.call_id.clone(), reason).await,
                };
                if let Err(e) = resolved {
                    tracing::warn!(call_id = %req.call_id, error = %e, "worker could not resolve call");
                }
            }
            if !matches!(worker_gateway.status("signup-batch-1").await, Some(ExecutionStatus::Running)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let status = gateway
        .wait_until_closed("signup-batch-1", Duration::from_secs(10))
        .await;
    worker.abort();
    decider.clone().shutdown().await;

    println!("final status: {status:?}");
    println!("decisions submitted: {}", decider.metrics().decisions_submitted);
    Ok(())
}
