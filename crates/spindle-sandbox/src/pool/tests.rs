//! Tests for worker placement and routing.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;

#[fixture]
fn pool() -> WorkerPool {
    let profile = SandboxProfile::new().with_timeout(Duration::from_millis(300));
    let bundler = DependencyBundler::from_directory("/nonexistent/spindle-packages");
    WorkerPool::spawn(2, &profile, &bundler).expect("pool starts")
}

fn counter(id: &str) -> EvaluationRequest {
    EvaluationRequest::new(
        id,
        "let count = 0;\nmodule.exports = { bump: () => ++count };",
    )
}

#[test]
fn zero_size_still_starts_one_worker() {
    let pool = WorkerPool::spawn(
        0,
        &SandboxProfile::new(),
        &DependencyBundler::from_directory("/nonexistent"),
    )
    .expect("pool starts");
    assert_eq!(pool.len(), 1);
    assert!(!pool.is_empty());
}

#[rstest]
#[tokio::test]
async fn extensions_are_spread_round_robin(pool: WorkerPool) {
    pool.evaluate(counter("first")).await.expect("evaluates");
    pool.evaluate(counter("second")).await.expect("evaluates");

    let (Some(a), Some(b)) = (pool.placement("first"), pool.placement("second")) else {
        panic!("both extensions should be placed");
    };
    assert_ne!(a, b);
}

#[rstest]
#[tokio::test]
async fn calls_reach_the_worker_holding_the_realm(pool: WorkerPool) {
    pool.evaluate(counter("sticky")).await.expect("evaluates");
    for expected in 1..=3 {
        let output = pool
            .invoke("sticky", "bump", Vec::new())
            .await
            .expect("invokes");
        assert_eq!(output.value, json!(expected));
    }
}

#[rstest]
#[tokio::test]
async fn reloading_keeps_the_placement(pool: WorkerPool) {
    pool.evaluate(counter("home")).await.expect("evaluates");
    let before = pool.placement("home");
    pool.evaluate(counter("elsewhere")).await.expect("evaluates");
    pool.evaluate(counter("home")).await.expect("reloads");
    assert_eq!(pool.placement("home"), before);
}

#[rstest]
#[tokio::test]
async fn failed_first_evaluation_is_not_placed(pool: WorkerPool) {
    pool.evaluate(EvaluationRequest::new("broken", "module.exports = {"))
        .await
        .expect_err("syntax error");
    assert_eq!(pool.placement("broken"), None);

    let error = pool
        .invoke("broken", "anything", Vec::new())
        .await
        .expect_err("not loaded");
    assert!(matches!(error, SandboxError::NotLoaded { .. }));
}

#[rstest]
#[tokio::test]
async fn unload_forgets_the_placement(pool: WorkerPool) {
    pool.evaluate(counter("brief")).await.expect("evaluates");
    pool.unload("brief").await.expect("unloads");
    assert_eq!(pool.placement("brief"), None);
    pool.unload("brief").await.expect("unknown ids are ignored");
}

#[rstest]
#[tokio::test]
async fn concurrent_first_loads_share_one_worker(pool: WorkerPool) {
    let (first, second) = tokio::join!(pool.evaluate(counter("twin")), pool.evaluate(counter("twin")));
    first.expect("first load");
    second.expect("second load");

    assert!(pool.placement("twin").is_some());

    pool.unload("twin").await.expect("unloads");
    for worker in &pool.workers {
        let error = worker
            .invoke("twin", "bump", Vec::new())
            .await
            .expect_err("no realm may survive the unload");
        assert!(matches!(error, SandboxError::NotLoaded { .. }));
    }
}
