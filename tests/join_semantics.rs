//! Join Semantics Tests
//!
//! Tests for join and nest operators inside full pipelines:
//! - Outer completeness: every outer row appears at least once
//! - Hash join results match a nested-loop reference
//! - Build-side memory is released after the join
//! - Index joins through a secondary index

use std::sync::Arc;

use aerodb_exec::context::{ExecContext, PipelineConfig};
use aerodb_exec::datastore::{MemoryIndex, MemoryKeyspace};
use aerodb_exec::execution::join::{HashJoin, IndexJoin, NestedLoopJoin};
use aerodb_exec::execution::scan::ExpressionScan;
use aerodb_exec::execution::{execute, Operator, QueryOutcome, Sequence};
use aerodb_exec::expression::{constant, eq, field, ExprRef};
use aerodb_exec::plan::{self, JoinKind};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn scan(alias: &str, docs: Value, config: &PipelineConfig) -> Box<dyn Operator> {
    let plan = plan::ExpressionScan {
        expr: constant(docs),
        alias: alias.to_string(),
    };
    Box::new(ExpressionScan::new(Arc::new(plan), config))
}

fn nested_loop(kind: JoinKind, outer: bool, on_clause: Option<ExprRef>, inner: Value, config: &PipelineConfig) -> Box<dyn Operator> {
    let plan = plan::NestedLoop {
        kind,
        alias: "c".to_string(),
        outer,
        on_clause,
        filter: None,
    };
    Box::new(NestedLoopJoin::new(scan("c", inner, config), Arc::new(plan), config))
}

fn hash_join(kind: JoinKind, outer: bool, build: Vec<ExprRef>, probe: Vec<ExprRef>, inner: Value, config: &PipelineConfig) -> Box<dyn Operator> {
    let plan = plan::HashJoin {
        kind,
        alias: "c".to_string(),
        outer,
        build_exprs: build,
        probe_exprs: probe,
        on_clause: None,
        filter: None,
    };
    Box::new(HashJoin::new(scan("c", inner, config), Arc::new(plan), config))
}

/// Runs `outer` rows through `join` and returns the outcome and context.
fn run(outer: Value, join: impl FnOnce(&PipelineConfig) -> Box<dyn Operator>) -> (QueryOutcome, Arc<ExecContext>) {
    let config = PipelineConfig::default().with_batch_size(4);
    let root = Sequence::new(vec![scan("o", outer, &config), join(&config)], &config);
    let ctx = ExecContext::shared(config);
    (execute(Box::new(root), ctx.clone()), ctx)
}

fn sorted(mut rows: Vec<Value>) -> Vec<Value> {
    rows.sort_by_key(|row| row.to_string());
    rows
}

// =============================================================================
// Outer Completeness
// =============================================================================

/// A false ON clause keeps every outer row exactly once, without the alias.
#[test]
fn test_outer_nested_loop_with_false_on_clause() {
    let (outcome, _) = run(json!([1, 2, 3]), |config| {
        nested_loop(JoinKind::Join, true, Some(constant(json!(false))), json!([{"id": 1}]), config)
    });
    assert_eq!(outcome.rows, vec![json!({"o": 1}), json!({"o": 2}), json!({"o": 3})]);
    assert!(outcome.is_success());
}

/// An inner join with a false ON clause produces nothing.
#[test]
fn test_inner_nested_loop_with_false_on_clause() {
    let (outcome, _) = run(json!([1, 2, 3]), |config| {
        nested_loop(JoinKind::Join, false, Some(constant(json!(false))), json!([{"id": 1}]), config)
    });
    assert!(outcome.rows.is_empty());
}

/// A true ON clause pairs each outer row with every inner row.
#[test]
fn test_nested_loop_cross_product() {
    let (outcome, _) = run(json!([1, 2]), |config| {
        nested_loop(JoinKind::Join, true, Some(constant(json!(true))), json!([{"id": 1}, {"id": 2}]), config)
    });
    assert_eq!(outcome.rows.len(), 4);
    for o in [1, 2] {
        let count = outcome.rows.iter().filter(|r| r["o"] == json!(o)).count();
        assert_eq!(count, 2);
    }
}

/// Outer rows without matches still appear; matched ones appear per match.
#[test]
fn test_outer_nested_loop_partial_matches() {
    let (outcome, _) = run(json!([1, 2, 3]), |config| {
        nested_loop(
            JoinKind::Join,
            true,
            Some(eq(field("o"), field("c.id"))),
            json!([{"id": 2}, {"id": 2}, {"id": 9}]),
            config,
        )
    });
    assert_eq!(
        outcome.rows,
        vec![
            json!({"o": 1}),
            json!({"o": 2, "c": {"id": 2}}),
            json!({"o": 2, "c": {"id": 2}}),
            json!({"o": 3}),
        ]
    );
}

/// An outer nest binds an empty array when nothing matches.
#[test]
fn test_outer_nest_collects_matches() {
    let (outcome, _) = run(json!([1, 4]), |config| {
        nested_loop(
            JoinKind::Nest,
            true,
            Some(eq(field("o"), field("c.id"))),
            json!([{"id": 1}, {"id": 1}]),
            config,
        )
    });
    assert_eq!(
        outcome.rows,
        vec![json!({"o": 1, "c": [{"id": 1}, {"id": 1}]}), json!({"o": 4, "c": []})]
    );
}

/// Hash joins with constant keys behave like a true ON clause.
#[test]
fn test_outer_hash_join_constant_keys() {
    let (outcome, _) = run(json!([1, 2, 3]), |config| {
        hash_join(
            JoinKind::Join,
            true,
            vec![constant(json!(1))],
            vec![constant(json!(1))],
            json!([{"id": 1}, {"id": 2}]),
            config,
        )
    });
    assert_eq!(outcome.rows.len(), 6);

    let (outcome, _) = run(json!([1, 2, 3]), |config| {
        hash_join(
            JoinKind::Join,
            true,
            vec![constant(json!(1))],
            vec![constant(json!(2))],
            json!([{"id": 1}, {"id": 2}]),
            config,
        )
    });
    assert_eq!(outcome.rows, vec![json!({"o": 1}), json!({"o": 2}), json!({"o": 3})]);
}

// =============================================================================
// Hash Join Correctness
// =============================================================================

/// 20 build rows over 5 keys probed by 0..7: each probe 0..4 matches 4 rows.
#[test]
fn test_hash_join_matches_nested_loop() {
    let build: Vec<Value> = (0..20).map(|i| json!({"id": i % 5, "seq": i})).collect();
    let probes: Vec<Value> = (0..7).map(|i| json!(i)).collect();

    let (hashed, ctx) = run(json!(probes), |config| {
        hash_join(JoinKind::Join, false, vec![field("c.id")], vec![field("o")], json!(build), config)
    });
    assert_eq!(hashed.rows.len(), 20);
    assert_eq!(ctx.quota().used(), 0);

    let (looped, _) = run(json!(probes), |config| {
        nested_loop(JoinKind::Join, false, Some(eq(field("o"), field("c.id"))), json!(build), config)
    });
    assert_eq!(sorted(hashed.rows), sorted(looped.rows));
}

/// Composite keys match on every part; a null part never matches.
#[test]
fn test_hash_join_composite_and_null_keys() {
    let inner = json!([{"a": 1, "b": "x"}, {"a": 1, "b": "y"}, {"a": null, "b": "x"}]);
    let outer = json!([{"a": 1, "b": "x"}, {"a": null, "b": "x"}]);
    let (outcome, _) = run(outer, |config| {
        hash_join(
            JoinKind::Join,
            false,
            vec![field("c.a"), field("c.b")],
            vec![field("o.a"), field("o.b")],
            inner,
            config,
        )
    });
    assert_eq!(
        outcome.rows,
        vec![json!({"o": {"a": 1, "b": "x"}, "c": {"a": 1, "b": "x"}})]
    );
}

// =============================================================================
// Index Join
// =============================================================================

/// Orders join their customer through an index on customer id.
#[test]
fn test_index_join_through_secondary_index() {
    let customers = MemoryKeyspace::with_docs(
        "customers",
        vec![
            ("c1", json!({"cid": "x", "name": "Ada"})),
            ("c2", json!({"cid": "y", "name": "Lin"})),
        ],
    );
    let by_cid = MemoryIndex::on_fields("by_cid", customers.clone(), &["cid"]);
    let (outcome, _) = run(json!([{"cid": "x"}, {"cid": "z"}]), |config| {
        let plan = plan::IndexJoin {
            kind: JoinKind::Join,
            alias: "c".to_string(),
            outer: true,
            keyspace: customers.clone(),
            index: by_cid.clone(),
            key_expr: field("o.cid"),
            covers: Vec::new(),
            on_clause: None,
        };
        Box::new(IndexJoin::new(Arc::new(plan), config))
    });
    assert_eq!(
        outcome.rows,
        vec![
            json!({"o": {"cid": "x"}, "c": {"cid": "x", "name": "Ada"}}),
            json!({"o": {"cid": "z"}}),
        ]
    );
    assert!(outcome.warnings.is_empty());
}
