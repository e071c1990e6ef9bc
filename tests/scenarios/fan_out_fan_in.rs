//! Two independent loads followed by a merge that depends on both.

use crate::common::{VERSION, WORKFLOW, activities, decide, expect_requests, fast_options, single_workflow};
use replayflow::providers::{HistoryOrder, TaskGateway};
use replayflow::providers::in_memory::{ExecutionStatus, HistoryDelivery, InMemoryGateway, InMemoryOptions};
use replayflow::runtime::TurnResult;
use replayflow::{Arg, Decider, DeciderOptions, WorkflowRegistry};
use std::sync::Arc;
use std::time::Duration;

fn fan_in_workflow() -> WorkflowRegistry {
    single_workflow(activities(&["LoadUsers", "LoadOrders", "Merge"]), |ctx, input| async move {
        let users = ctx.activity("LoadUsers")?.call([input.clone().into()]);
        let orders = ctx.activity("LoadOrders")?.call([input.into()]);
        let merged = ctx
            .activity("Merge")?
            .call_as::<String>([Arg::from(&users), Arg::from(&orders)]);
        merged.await.map_err(|e| e.to_string())
    })
}

async fn run_fan_out(gateway: InMemoryOptions, decider: DeciderOptions) {
    let gw = Arc::new(InMemoryGateway::with_options(InMemoryOptions {
        poll_timeout: Duration::from_millis(20),
        ..gateway
    }));
    gw.start_workflow("wf-1", WORKFLOW, VERSION, "2024-06").await.unwrap();
    let decider = Decider::new(gw.clone(), fan_in_workflow(), decider);

    let first = decide(&decider).await;
    let names: Vec<_> = expect_requests(&first).iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["LoadUsers", "LoadOrders"]);
    assert_eq!(gw.open_calls("wf-1").await.len(), 2);

    gw.complete_call("wf-1", "1", "[3,4]").await.unwrap();
    gw.complete_call("wf-1", "0", r#"["ann","bob"]"#).await.unwrap();

    let second = decide(&decider).await;
    let merge = expect_requests(&second);
    assert_eq!(merge.len(), 1);
    assert_eq!(merge[0].call_id.as_str(), "2");
    assert_eq!(merge[0].input, r#"[["ann","bob"],[3,4]]"#);

    gw.complete_call("wf-1", "2", "\"ann:3,bob:4\"").await.unwrap();
    let third = decide(&decider).await;
    assert_eq!(
        third,
        TurnResult::Completed {
            result: "ann:3,bob:4".into()
        }
    );
    assert_eq!(
        gw.status("wf-1").await,
        Some(ExecutionStatus::Completed {
            result: "ann:3,bob:4".into()
        })
    );

    let metrics = decider.metrics();
    assert_eq!(metrics.decisions_submitted, 2);
    assert_eq!(metrics.requests_scheduled, 3);
    assert_eq!(metrics.workflows_completed, 1);
    assert_eq!(metrics.protocol_violations, 0);
}

#[tokio::test]
async fn fan_out_then_fan_in_with_full_history() {
    run_fan_out(InMemoryOptions::default(), fast_options()).await;
}

#[tokio::test]
async fn fan_out_then_fan_in_with_reverse_pages() {
    run_fan_out(
        InMemoryOptions {
            page_size: 2,
            order: HistoryOrder::ReverseChronological,
            ..Default::default()
        },
        DeciderOptions {
            history_order: HistoryOrder::ReverseChronological,
            ..fast_options()
        },
    )
    .await;
}

#[tokio::test]
async fn fan_out_then_fan_in_with_incremental_delivery() {
    run_fan_out(
        InMemoryOptions {
            page_size: 1,
            delivery: HistoryDelivery::SinceBoundary,
            ..Default::default()
        },
        fast_options(),
    )
    .await;
}

#[tokio::test]
async fn partial_fan_in_submits_an_empty_decision() {
    let gw = crate::common::quick_gateway();
    gw.start_workflow("wf-2", WORKFLOW, VERSION, "2024-07").await.unwrap();
    let decider = Decider::new(gw.clone(), fan_in_workflow(), fast_options());

    decide(&decider).await;
    gw.complete_call("wf-2", "0", "[]").await.unwrap();

    let waiting = decide(&decider).await;
    assert!(expect_requests(&waiting).is_empty());
    assert_eq!(gw.open_calls("wf-2").await.len(), 1);
    assert_eq!(gw.status("wf-2").await, Some(ExecutionStatus::Running));
    assert_eq!(gw.submissions().await.len(), 2);
}

#[tokio::test]
async fn resolution_during_a_decision_is_seen_by_the_next_one() {
    let gw = crate::common::quick_gateway();
    gw.start_workflow("wf-3", WORKFLOW, VERSION, "2024-08").await.unwrap();
    let decider = Decider::new(gw.clone(), fan_in_workflow(), fast_options());
    decide(&decider).await;
    gw.complete_call("wf-3", "0", "[]").await.unwrap();

    // Take the task by hand, resolve the other load while it is outstanding,
    // then let the decider finish it.
    let task = gw.poll_decision("default", "test").await.unwrap().unwrap();
    gw.complete_call("wf-3", "1", "[]").await.unwrap();
    let stale = decider.process_task(task).await.unwrap();
    assert!(expect_requests(&stale).is_empty());

    let next = decide(&decider).await;
    assert_eq!(expect_requests(&next)[0].name, "Merge");
}
