//! Failures handed to coordination code instead of failing the workflow.

use crate::common::{VERSION, WORKFLOW, decide, fast_options, quick_gateway, single_workflow};
use replayflow::providers::in_memory::ExecutionStatus;
use replayflow::runtime::TurnResult;
use replayflow::{ActivityErrorKind, ActivityProxy, ActivityRegistry, AppErrorKind, Decider, ErrorDetails};

fn validate_registry(manual: bool) -> ActivityRegistry {
    ActivityRegistry::builder()
        .register(ActivityProxy::builder("Validate", "1").manual_errors(manual).build())
        .build_result()
        .unwrap()
}

#[tokio::test]
async fn caught_failure_yields_fallback_result() {
    let gw = quick_gateway();
    gw.start_workflow("val-1", WORKFLOW, VERSION, "{}").await.unwrap();
    let workflows = single_workflow(validate_registry(true), |ctx, input| async move {
        match ctx.activity("Validate")?.call_as::<String>([input.into()]).await {
            Ok(v) => Ok(v),
            Err(e) if e.kind == ActivityErrorKind::Failed && e.reason == "bad input" => Ok("fallback".to_string()),
            Err(e) => Err(e.to_string()),
        }
    });
    let decider = Decider::new(gw.clone(), workflows, fast_options());

    decide(&decider).await;
    gw.fail_call("val-1", "0", "bad input").await.unwrap();
    assert_eq!(
        decide(&decider).await,
        TurnResult::Completed {
            result: "fallback".into()
        }
    );
    assert_eq!(
        gw.status("val-1").await,
        Some(ExecutionStatus::Completed {
            result: "fallback".into()
        })
    );
}

#[tokio::test]
async fn same_code_in_auto_mode_fails_the_workflow() {
    let gw = quick_gateway();
    gw.start_workflow("val-2", WORKFLOW, VERSION, "{}").await.unwrap();
    let workflows = single_workflow(validate_registry(false), |ctx, input| async move {
        match ctx.activity("Validate")?.call_as::<String>([input.into()]).await {
            Ok(v) => Ok(v),
            Err(_) => Ok("fallback".to_string()),
        }
    });
    let decider = Decider::new(gw.clone(), workflows, fast_options());

    decide(&decider).await;
    gw.fail_call("val-2", "0", "bad input").await.unwrap();
    match decide(&decider).await {
        TurnResult::Failed(ErrorDetails::Application { kind, message }) => {
            assert_eq!(kind, AppErrorKind::ActivityFailed);
            assert!(message.contains("bad input"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn uncaught_error_from_code_fails_with_its_message() {
    let gw = quick_gateway();
    gw.start_workflow("val-3", WORKFLOW, VERSION, "{}").await.unwrap();
    let workflows = single_workflow(validate_registry(true), |ctx, input| async move {
        ctx.activity("Validate")?
            .call_as::<String>([input.into()])
            .await
            .map_err(|e| format!("validation rejected: {}", e.reason))
    });
    let decider = Decider::new(gw.clone(), workflows, fast_options());

    decide(&decider).await;
    gw.fail_call("val-3", "0", "bad input").await.unwrap();
    decide(&decider).await;
    assert_eq!(
        gw.status("val-3").await,
        Some(ExecutionStatus::Failed {
            reason: "validation rejected: bad input".into()
        })
    );
}
