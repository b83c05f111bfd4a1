//! DML and MERGE Pipeline Tests
//!
//! Tests for mutation operators inside full pipelines:
//! - Scan, fetch, set and update as one statement
//! - Batched deletes with a limit
//! - Transactional statements abort on the first storage error
//! - MERGE routes every source row to at most one action per key

use std::sync::Arc;

use aerodb_exec::context::{ExecContext, PipelineConfig};
use aerodb_exec::datastore::{MemoryIndex, MemoryKeyspace};
use aerodb_exec::execution::dml::{Merge, SendDelete, SendInsert, SendUpdate};
use aerodb_exec::execution::scan::{ExpressionScan, PrimaryScan};
use aerodb_exec::execution::{execute, CloneDocument, Fetch, Operator, QueryOutcome, Sequence, Set};
use aerodb_exec::expression::{constant, field};
use aerodb_exec::plan;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn source(alias: &str, docs: Value, config: &PipelineConfig) -> Box<dyn Operator> {
    let plan = plan::ExpressionScan {
        expr: constant(docs),
        alias: alias.to_string(),
    };
    Box::new(ExpressionScan::new(Arc::new(plan), config))
}

/// PrimaryScan + Fetch binding every document of `ks` to `alias`.
fn scan_and_fetch(ks: &Arc<MemoryKeyspace>, alias: &str, config: &PipelineConfig) -> Vec<Box<dyn Operator>> {
    let index = MemoryIndex::primary(ks.clone());
    let scan = PrimaryScan::new(Arc::new(plan::PrimaryScan::new(index)), config);
    let fetch = Fetch::new(
        Arc::new(plan::Fetch {
            keyspace: ks.clone(),
            alias: alias.to_string(),
        }),
        config,
    );
    vec![Box::new(scan), Box::new(fetch)]
}

fn run(children: Vec<Box<dyn Operator>>, config: PipelineConfig) -> QueryOutcome {
    let root = Sequence::new(children, &config);
    execute(Box::new(root), ExecContext::shared(config))
}

fn accounts() -> Arc<MemoryKeyspace> {
    MemoryKeyspace::with_docs(
        "accounts",
        (1..=6).map(|i| (format!("a{i}"), json!({"balance": i * 10, "status": "open"}))),
    )
}

// =============================================================================
// Update and Delete
// =============================================================================

/// UPDATE accounts SET status = "closed" touches every document once.
#[test]
fn test_scan_fetch_set_update() {
    let ks = accounts();
    let config = PipelineConfig::default().with_batch_size(4);
    let mut children = scan_and_fetch(&ks, "t", &config);
    children.push(Box::new(CloneDocument::new("t", &config)));
    children.push(Box::new(Set::new(
        Arc::new(plan::Set {
            alias: "t".to_string(),
            terms: vec![plan::SetTerm::set("status", constant(json!("closed")))],
        }),
        &config,
    )));
    children.push(Box::new(SendUpdate::new(
        Arc::new(plan::SendUpdate {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        }),
        &config,
    )));
    let outcome = run(children, config);

    assert!(outcome.is_success());
    assert_eq!(outcome.mutations, 6);
    for key in ks.keys() {
        assert_eq!(ks.get(&key).map(|doc| doc["status"].clone()), Some(json!("closed")));
    }
    assert!(ks.mutation_batches().iter().all(|&n| n <= 4));
}

/// DELETE ... LIMIT 4 removes exactly four documents.
#[test]
fn test_delete_with_limit() {
    let ks = accounts();
    let config = PipelineConfig::default().with_batch_size(3);
    let mut children = scan_and_fetch(&ks, "t", &config);
    children.push(Box::new(SendDelete::new(
        Arc::new(plan::SendDelete {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: Some(constant(json!(4))),
        }),
        &config,
    )));
    let outcome = run(children, config);

    assert!(outcome.is_success());
    assert_eq!(outcome.mutations, 4);
    assert_eq!(ks.len(), 2);
}

// =============================================================================
// Transactional Failure
// =============================================================================

fn insert_statement(ks: &Arc<MemoryKeyspace>, config: &PipelineConfig) -> Vec<Box<dyn Operator>> {
    let docs = json!([{"k": "a1", "v": 1}, {"k": "n1", "v": 2}]);
    let insert = plan::SendInsert::with_exprs(ks.clone(), "t", field("d.k"), field("d"));
    vec![
        source("d", docs, config),
        Box::new(SendInsert::new(Arc::new(insert), config)),
    ]
}

/// Outside a transaction a duplicate key fails only its own row.
#[test]
fn test_duplicate_insert_partial_success() {
    let ks = accounts();
    let config = PipelineConfig::default();
    let outcome = run(insert_statement(&ks, &config), config);

    assert!(!outcome.aborted);
    assert_eq!(outcome.rows, vec![json!({"t": {"k": "n1", "v": 2}})]);
    assert_eq!(outcome.error_codes(), vec!["AERO_EXEC_STORAGE"]);
    assert!(ks.get("n1").is_some());
}

/// Inside a transaction the same statement aborts and returns no rows.
#[test]
fn test_duplicate_insert_aborts_transaction() {
    let ks = accounts();
    let config = PipelineConfig::transactional();
    let outcome = run(insert_statement(&ks, &config), config);

    assert!(outcome.aborted);
    assert!(outcome.rows.is_empty());
    assert!(!outcome.is_success());
}

// =============================================================================
// MERGE
// =============================================================================

fn merge(ks: &Arc<MemoryKeyspace>, config: &PipelineConfig) -> Box<dyn Operator> {
    let plan = plan::Merge {
        keyspace: ks.clone(),
        alias: "t".to_string(),
        key: Some(field("s.id")),
        update_condition: Some(field("s.update")),
        delete_condition: None,
        insert: Some(plan::MergeInsert {
            key: None,
            value: field("s.doc"),
            options: None,
            condition: None,
        }),
    };
    let update = SendUpdate::new(
        Arc::new(plan::SendUpdate {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        }),
        config,
    );
    let delete = SendDelete::new(
        Arc::new(plan::SendDelete {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        }),
        config,
    );
    let insert = SendInsert::new(Arc::new(plan::SendInsert::from_attachment(ks.clone(), "t")), config);
    Box::new(Merge::new(
        Arc::new(plan),
        Some(Box::new(update)),
        Some(Box::new(delete)),
        Some(Box::new(insert)),
        config,
    ))
}

/// Matched rows update or delete, unmatched rows insert, each exactly once.
#[test]
fn test_merge_routes_exclusively() {
    let ks = accounts();
    let config = PipelineConfig::default().with_batch_size(2);
    let sources = json!([
        {"id": "a1", "update": true},
        {"id": "a2", "update": false},
        {"id": "z1", "doc": {"balance": 0}},
        {"id": "z2", "doc": {"balance": 5}},
    ]);
    let outcome = run(vec![source("s", sources, &config), merge(&ks, &config)], config);

    assert!(outcome.is_success());
    assert_eq!(outcome.mutations, 4);
    assert!(ks.get("a1").is_some());
    assert!(ks.get("a2").is_none());
    assert_eq!(ks.get("z1"), Some(json!({"balance": 0})));
    assert_eq!(ks.get("z2"), Some(json!({"balance": 5})));
    assert_eq!(ks.len(), 7);
}

/// Two source rows naming the same target fail the statement once.
#[test]
fn test_merge_rejects_second_update_of_key() {
    let ks = accounts();
    let config = PipelineConfig::default();
    let sources = json!([
        {"id": "a1", "update": true},
        {"id": "a1", "update": true},
    ]);
    let outcome = run(vec![source("s", sources, &config), merge(&ks, &config)], config);

    assert_eq!(outcome.error_codes(), vec!["AERO_EXEC_MERGE_MULTI_UPDATE"]);
    assert!(outcome.mutations <= 1);
}
