//! Circuit breaker and rate governor behavior across calls.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use kiln::config::GovernanceConfig;
use kiln::error::KilnError;
use kiln::gateway::ValidationGateway;
use kiln::governance::{BreakerStatus, Governance};
use kiln::tools::{FnTool, ToolExecutionContext, ToolExecutionResult, ToolParameters, ToolRegistry};
use kiln::types::AgentToolCall;

/// Tool that fails while `failing` is set and counts its executions.
fn flaky(executions: Arc<AtomicU32>, failing: Arc<std::sync::atomic::AtomicBool>) -> ToolRegistry {
    ToolRegistry::new().with(Arc::new(FnTool::new(
        "lookup",
        "Flaky lookup",
        ToolParameters::empty(),
        move |_, _| {
            let executions = executions.clone();
            let failing = failing.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                if failing.load(Ordering::SeqCst) {
                    Err(KilnError::upstream(503, "backend down"))
                } else {
                    Ok(ToolExecutionResult::success(json!({"ok": true})))
                }
            }
        },
    )))
}

fn call(id: &str) -> AgentToolCall {
    AgentToolCall {
        id: id.into(),
        name: "lookup".into(),
        arguments: json!({}),
    }
}

/// Admit and execute one call on a fresh turn budget.
async fn run_once(gateway: &ValidationGateway, tools: &ToolRegistry, id: &str) -> Result<ToolExecutionResult, KilnError> {
    let mut budget = gateway.turn_budget();
    let admitted = gateway.admit(&mut budget, "alice", tools, &call(id))?;
    Ok(gateway
        .execute(admitted, ToolExecutionContext::new(id, "turn", "alice"))
        .await)
}

#[tokio::test(start_paused = true)]
async fn breaker_lifecycle_open_half_open_closed() {
    let executions = Arc::new(AtomicU32::new(0));
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let tools = flaky(executions.clone(), failing.clone());
    let gateway = ValidationGateway::new(common::governance());
    let breakers = gateway.governance().breakers();

    for i in 0..3 {
        let result = run_once(&gateway, &tools, &format!("f{i}")).await.unwrap();
        assert!(!result.success);
    }
    assert_eq!(breakers.status("lookup"), BreakerStatus::Open);

    let err = run_once(&gateway, &tools, "rejected").await.unwrap_err();
    match err {
        KilnError::CircuitOpen { retry_after_ms, .. } => assert!(retry_after_ms > 0 && retry_after_ms <= 30_000),
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(executions.load(Ordering::SeqCst), 3, "open breaker must not execute");

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(breakers.status("lookup"), BreakerStatus::HalfOpen);

    failing.store(false, Ordering::SeqCst);
    let trial = run_once(&gateway, &tools, "trial").await.unwrap();
    assert!(trial.success);
    assert_eq!(breakers.status("lookup"), BreakerStatus::Closed);
    assert_eq!(breakers.consecutive_failures("lookup"), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_with_a_fresh_cooldown() {
    let executions = Arc::new(AtomicU32::new(0));
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let tools = flaky(executions.clone(), failing);
    let gateway = ValidationGateway::new(common::governance());
    let breakers = gateway.governance().breakers();

    for i in 0..3 {
        run_once(&gateway, &tools, &format!("f{i}")).await.unwrap();
    }
    tokio::time::advance(Duration::from_secs(30)).await;

    let trial = run_once(&gateway, &tools, "trial").await.unwrap();
    assert!(!trial.success);
    assert_eq!(breakers.status("lookup"), BreakerStatus::Open);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(matches!(
        run_once(&gateway, &tools, "early").await,
        Err(KilnError::CircuitOpen { .. })
    ));
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(breakers.status("lookup"), BreakerStatus::HalfOpen);
    assert_eq!(executions.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn half_open_admits_exactly_one_trial() {
    let governance = common::governance();
    let breakers = governance.breakers();
    for _ in 0..3 {
        breakers.admit("lookup").unwrap().record_failure();
    }
    tokio::time::advance(Duration::from_secs(30)).await;

    let trial = breakers.admit("lookup").unwrap();
    assert!(trial.is_trial());
    let second = breakers.admit("lookup").unwrap_err();
    assert!(matches!(second, KilnError::CircuitOpen { retry_after_ms: 1_000, .. }));

    drop(trial);
    let retried = breakers.admit("lookup").unwrap();
    assert!(retried.is_trial(), "an unresolved trial frees the slot");
}

#[tokio::test(start_paused = true)]
async fn breakers_are_independent_per_tool() {
    let governance = common::governance();
    for _ in 0..3 {
        governance.breakers().admit("image").unwrap().record_failure();
    }

    assert_eq!(governance.breakers().status("image"), BreakerStatus::Open);
    assert_eq!(governance.breakers().status("search"), BreakerStatus::Closed);
    assert!(governance.admit("alice", "search").is_ok());
}

#[tokio::test(start_paused = true)]
async fn rate_quota_is_per_principal_and_tool_and_resets_with_the_window() {
    let governance = Governance::new(GovernanceConfig {
        rate_limit_calls: 2,
        rate_limit_window_ms: 10_000,
        ..GovernanceConfig::default()
    });

    governance.admit("alice", "search").unwrap().record_success();
    governance.admit("alice", "search").unwrap().record_success();
    let err = governance.admit("alice", "search").unwrap_err();
    assert!(matches!(err, KilnError::RateLimited { retry_after_ms } if retry_after_ms <= 10_000));

    assert!(governance.admit("bob", "search").is_ok());
    assert!(governance.admit("alice", "image").is_ok());

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(governance.admit("alice", "search").is_ok());
    assert_eq!(governance.rates().count("alice", "search"), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_rejection_does_not_consume_the_trial_slot() {
    let governance = Governance::new(GovernanceConfig {
        rate_limit_calls: 1,
        ..GovernanceConfig::default()
    });
    governance.admit("alice", "lookup").unwrap().record_failure();
    for _ in 0..2 {
        governance.breakers().admit("lookup").unwrap().record_failure();
    }
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(matches!(
        governance.admit("alice", "lookup"),
        Err(KilnError::RateLimited { .. })
    ));
    let trial = governance.admit("bob", "lookup").unwrap();
    assert!(trial.is_trial());
}
