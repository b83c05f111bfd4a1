//! Operator Lifecycle Tests
//!
//! Tests for whole-tree behavior:
//! - Parallel replicas neither lose nor duplicate rows
//! - Limit stops upstream producers early
//! - Cancellation unwinds a blocked pipeline
//! - A panicking operator fails the request without hanging it

use std::collections::BTreeSet;
use std::sync::Arc;

use aerodb_exec::context::{ExecContext, PipelineConfig};
use aerodb_exec::execution::scan::ExpressionScan;
use aerodb_exec::execution::{execute, ExecutionHandle, Filter, Limit, Offset, Operator, Parallel, Sequence};
use aerodb_exec::expression::{constant, func};
use aerodb_exec::plan;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn numbers(n: u64, config: &PipelineConfig) -> Box<dyn Operator> {
    let values: Vec<Value> = (0..n).map(|i| json!(i)).collect();
    let plan = plan::ExpressionScan {
        expr: constant(Value::Array(values)),
        alias: "o".to_string(),
    };
    Box::new(ExpressionScan::new(Arc::new(plan), config))
}

fn even_filter(config: &PipelineConfig) -> Box<dyn Operator> {
    let condition = func(|item| {
        let n = item.field("o").and_then(Value::as_u64).unwrap_or(1);
        Ok(json!(n % 2 == 0))
    });
    Box::new(Filter::new(Arc::new(plan::Filter { condition }), config))
}

// =============================================================================
// Parallel
// =============================================================================

/// Four filter replicas share one input and together keep every even row.
#[test]
fn test_parallel_filter_keeps_every_row_once() {
    let config = PipelineConfig::default()
        .with_max_parallelism(4)
        .with_pipeline_capacity(8);
    let parallel = Parallel::new(even_filter(&config), 4, &config);
    let root = Sequence::new(vec![numbers(1000, &config), Box::new(parallel)], &config);
    let outcome = execute(Box::new(root), ExecContext::shared(config));

    assert!(outcome.is_success());
    assert_eq!(outcome.rows.len(), 500);
    let seen: BTreeSet<u64> = outcome.rows.iter().filter_map(|r| r["o"].as_u64()).collect();
    assert_eq!(seen.len(), 500);
    assert!(seen.iter().all(|n| n % 2 == 0));
}

/// The request's parallelism caps the replica count.
#[test]
fn test_parallel_capped_by_request() {
    let config = PipelineConfig::default();
    let parallel = Parallel::new(even_filter(&config), 8, &config);
    let root = Sequence::new(vec![numbers(10, &config), Box::new(parallel)], &config);
    let outcome = execute(Box::new(root), ExecContext::shared(config));

    assert_eq!(outcome.rows.len(), 5);
    assert_eq!(outcome.stats.children[1].children.len(), 1);
}

// =============================================================================
// Early Exit
// =============================================================================

/// OFFSET 5 LIMIT 3 over a long stream returns three rows and finishes.
#[test]
fn test_offset_limit_stops_upstream() {
    let config = PipelineConfig::default().with_pipeline_capacity(4);
    let offset = Offset::new(Arc::new(plan::Offset { count: constant(json!(5)) }), &config);
    let limit = Limit::new(Arc::new(plan::Limit { count: constant(json!(3)) }), &config);
    let root = Sequence::new(
        vec![numbers(100_000, &config), Box::new(offset), Box::new(limit)],
        &config,
    );
    let outcome = execute(Box::new(root), ExecContext::shared(config));

    assert_eq!(outcome.rows, vec![json!({"o": 5}), json!({"o": 6}), json!({"o": 7})]);
    assert!(outcome.is_success());
}

// =============================================================================
// Cancellation and Failure
// =============================================================================

/// Cancelling after the first row unwinds producers blocked on full exchanges.
#[test]
fn test_cancel_unwinds_pipeline() {
    let config = PipelineConfig::default().with_pipeline_capacity(2);
    let root = Sequence::new(vec![numbers(100_000, &config), even_filter(&config)], &config);
    let ctx = ExecContext::shared(config);
    let mut handle = ExecutionHandle::start(Box::new(root), ctx);

    assert!(handle.next_item().is_some());
    handle.cancel();
    assert!(handle.is_cancelled());
    let outcome = handle.finish();

    assert!(outcome.rows.len() < 50_000);
    assert!(outcome.errors.is_empty());
}

/// A panic inside an expression becomes a request error; the tree still ends.
#[test]
fn test_operator_panic_is_recovered() {
    let config = PipelineConfig::default().with_pipeline_capacity(2);
    let condition = func(|item| {
        if item.field("o") == Some(&json!(3)) {
            panic!("filter blew up");
        }
        Ok(json!(true))
    });
    let filter = Filter::new(Arc::new(plan::Filter { condition }), &config);
    let root = Sequence::new(vec![numbers(1000, &config), Box::new(filter)], &config);
    let outcome = execute(Box::new(root), ExecContext::shared(config));

    assert_eq!(outcome.error_codes(), vec!["AERO_EXEC_PANIC"]);
    assert!(outcome.errors[0].contains("filter blew up"));
    assert!(outcome.rows.len() <= 3);
}
