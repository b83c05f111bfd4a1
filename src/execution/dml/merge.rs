//! MERGE orchestration
//!
//! Each source row is routed to at most one of three branch pipelines:
//! matched rows to update or delete, unmatched rows to insert. Branches run
//! concurrently, each reading a private input exchange and writing into the
//! MERGE output. Per run, a key may be acted on at most once when matched and
//! inserted at most once; a key inserted earlier in the run counts as
//! unmatched for later rows.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, ValueExchange};
use crate::execution::base::OperatorBase;
use crate::execution::errors::{ExecutionError, ExecutionResult};
use crate::execution::eval::eval_error;
use crate::execution::operator::{Child, Operator};
use crate::expression::evaluate_condition;
use crate::observability::{log_event_with_fields, Event};
use crate::plan;
use crate::value::{AnnotatedValue, DocumentMeta, InsertPayload};

/// Action taken on a matched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchedAction {
    Update,
    Delete,
}

/// Branch slots, in routing priority order.
const UPDATE: usize = 0;
const DELETE: usize = 1;
const INSERT: usize = 2;

struct Branch {
    child: Child,
    input: Arc<ValueExchange>,
    token: Option<u64>,
}

impl Branch {
    fn wire(mut op: Box<dyn Operator>, output: &Arc<ValueExchange>, base: &OperatorBase, capacity: usize) -> Self {
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(capacity));
        op.set_input(Some(input.clone()));
        op.set_output(output.clone(), false);
        let child = Child::new(op);
        base.adopt(&child);
        Self {
            child,
            input,
            token: None,
        }
    }
}

/// Where a source row goes.
enum Route {
    Matched { key: String, row: AnnotatedValue },
    Unmatched(AnnotatedValue),
    Skip,
    /// A failure already reported ends the run
    Stop,
}

pub struct Merge {
    base: OperatorBase,
    plan: Arc<plan::Merge>,
    branches: [Option<Branch>; 3],
    matched: FxHashMap<String, MatchedAction>,
    inserted: FxHashSet<String>,
}

impl Merge {
    pub fn new(
        plan: Arc<plan::Merge>,
        update: Option<Box<dyn Operator>>,
        delete: Option<Box<dyn Operator>>,
        insert: Option<Box<dyn Operator>>,
        config: &PipelineConfig,
    ) -> Self {
        let base = OperatorBase::new("Merge", Phase::Merge, config);
        let branches = Self::wire([update, delete, insert], &base, config.pipeline_capacity);
        Self {
            base,
            plan,
            branches,
            matched: FxHashMap::default(),
            inserted: FxHashSet::default(),
        }
    }

    fn wire(ops: [Option<Box<dyn Operator>>; 3], base: &OperatorBase, capacity: usize) -> [Option<Branch>; 3] {
        let output = base.output().clone();
        ops.map(|op| op.map(|op| Branch::wire(op, &output, base, capacity)))
    }

    /// Number of keys matched so far this run.
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }

    /// Number of keys inserted so far this run.
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    fn route(&mut self, mut item: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<Route> {
        let name = self.base.name();
        let alias = self.plan.alias.as_str();
        let Some(key_expr) = &self.plan.key else {
            let matched = item.field(alias).is_some_and(|v| !v.is_null());
            let key = item.key_for(alias).map(str::to_string);
            return match key {
                Some(key) if matched && !self.inserted.contains(&key) => Ok(Route::Matched { key, row: item }),
                None if matched => {
                    item.recycle();
                    Err(ExecutionError::internal(name, "matched merge target carries no document key"))
                }
                _ => Ok(Route::Unmatched(item)),
            };
        };
        let key = match key_expr.evaluate(&item, ctx).map_err(|e| eval_error(name, e))? {
            Value::String(key) => key,
            Value::Null => return Ok(Route::Unmatched(item)),
            other => {
                ctx.error(ExecutionError::evaluation(name, format!("merge key must be a string, got {other}")));
                return Ok(Route::Skip);
            }
        };
        if self.inserted.contains(&key) {
            return Ok(Route::Unmatched(item));
        }
        let keyspace = Arc::clone(&self.plan.keyspace);
        let lookup = [key.clone()];
        let outcome = self.base.time_service(|| keyspace.fetch(&lookup));
        if !outcome.errors.is_empty() {
            if !ctx.report_storage_errors(name, outcome.errors) {
                return Ok(Route::Stop);
            }
            return Ok(Route::Skip);
        }
        match outcome.docs.into_iter().next() {
            Some(target) => {
                item.set_field(alias, target.into_value());
                item.set_alias_meta(alias, DocumentMeta::with_id(key.clone()));
                Ok(Route::Matched { key, row: item })
            }
            None => Ok(Route::Unmatched(item)),
        }
    }

    fn send_to(&mut self, slot: usize, item: AnnotatedValue) -> bool {
        match &self.branches[slot] {
            Some(branch) => {
                let sent = branch.input.send(item);
                if !sent {
                    self.base.mark_stopping();
                }
                sent
            }
            None => {
                item.recycle();
                true
            }
        }
    }

    fn conflict(&self, key: &str, err: ExecutionError, ctx: &ExecContext) {
        log_event_with_fields(Event::MergeConflict, &[("key", key), ("code", err.code())]);
        ctx.error(err);
    }

    fn handle_matched(&mut self, key: String, mut row: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<bool> {
        let name = self.base.name();
        let action = if self.branches[UPDATE].is_some()
            && evaluate_condition(self.plan.update_condition.as_ref(), &row, ctx).map_err(|e| eval_error(name, e))?
        {
            Some(MatchedAction::Update)
        } else if self.branches[DELETE].is_some()
            && evaluate_condition(self.plan.delete_condition.as_ref(), &row, ctx).map_err(|e| eval_error(name, e))?
        {
            Some(MatchedAction::Delete)
        } else {
            None
        };
        let Some(action) = action else {
            row.recycle();
            return Ok(true);
        };
        if self.matched.contains_key(&key) {
            self.conflict(&key, ExecutionError::MergeMultiUpdate { key: key.clone() }, ctx);
            row.recycle();
            return Ok(false);
        }
        self.matched.insert(key, action);
        match action {
            MatchedAction::Update => {
                let target = row.field(&self.plan.alias).cloned();
                row.attachments_mut().clone = target;
                Ok(self.send_to(UPDATE, row))
            }
            MatchedAction::Delete => Ok(self.send_to(DELETE, row)),
        }
    }

    fn handle_unmatched(&mut self, mut row: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<bool> {
        let name = self.base.name();
        let (Some(insert), true) = (&self.plan.insert, self.branches[INSERT].is_some()) else {
            row.recycle();
            return Ok(true);
        };
        if !evaluate_condition(insert.condition.as_ref(), &row, ctx).map_err(|e| eval_error(name, e))? {
            row.recycle();
            return Ok(true);
        }
        let key_expr = insert.key.as_ref().or(self.plan.key.as_ref());
        let Some(key_expr) = key_expr else {
            return Err(ExecutionError::internal(name, "merge insert has no key expression"));
        };
        let key = match key_expr.evaluate(&row, ctx).map_err(|e| eval_error(name, e))? {
            Value::String(key) => key,
            other => {
                ctx.error(ExecutionError::evaluation(name, format!("insert key must be a string, got {other}")));
                row.recycle();
                return Ok(true);
            }
        };
        if self.inserted.contains(&key) {
            self.conflict(&key, ExecutionError::MergeMultiInsert { key: key.clone() }, ctx);
            row.recycle();
            return Ok(false);
        }
        let value = insert.value.evaluate(&row, ctx).map_err(|e| eval_error(name, e))?;
        let options = match &insert.options {
            Some(expr) => Some(expr.evaluate(&row, ctx).map_err(|e| eval_error(name, e))?).filter(|v| !v.is_null()),
            None => None,
        };
        self.inserted.insert(key.clone());
        row.attachments_mut().insert = Some(InsertPayload { key, value, options });
        Ok(self.send_to(INSERT, row))
    }

    fn release_branches(&mut self, stop: bool) {
        for branch in self.branches.iter_mut().flatten() {
            if stop {
                branch.child.stop();
            }
            branch.input.close();
        }
        for branch in self.branches.iter_mut().flatten() {
            branch.child.wait();
            if let Some(token) = branch.token.take() {
                self.base.stop_handle().detach(token);
            }
        }
    }
}

impl std::fmt::Debug for Merge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let branches: Vec<_> = self.branches.iter().flatten().map(|b| &b.child).collect();
        f.debug_struct("Merge")
            .field("keyspace", &self.plan.keyspace.name())
            .field("branches", &branches)
            .field("matched", &self.matched.len())
            .field("inserted", &self.inserted.len())
            .finish()
    }
}

impl Operator for Merge {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let ops = [UPDATE, DELETE, INSERT].map(|slot| self.branches[slot].as_ref().map(|b| b.child.copy_op()));
        let capacity = self.base.output().capacity();
        let branches = Self::wire(ops, &base, capacity);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            branches,
            matched: FxHashMap::default(),
            inserted: FxHashSet::default(),
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        self.matched.clear();
        self.inserted.clear();
        for branch in self.branches.iter_mut().flatten() {
            branch.token = Some(self.base.stop_handle().attach(branch.input.clone()));
            if !branch.child.start(ctx, parent) {
                return false;
            }
        }
        true
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let outcome = match self.route(item, ctx) {
            Ok(Route::Matched { key, row }) => self.handle_matched(key, row, ctx),
            Ok(Route::Unmatched(row)) => self.handle_unmatched(row, ctx),
            Ok(Route::Skip) => Ok(true),
            Ok(Route::Stop) => Ok(false),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(keep_going) => keep_going,
            Err(err) => {
                let fatal = err.is_fatal();
                ctx.error(err);
                !fatal
            }
        }
    }

    fn after_items(&mut self, _ctx: &Arc<ExecContext>) {
        let stopped = self.base.is_stopped();
        self.release_branches(stopped);
    }

    fn children(&self) -> Vec<&Child> {
        self.branches.iter().flatten().map(|b| &b.child).collect()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        self.branches.iter_mut().flatten().map(|b| &mut b.child).collect()
    }

    fn reopen(&mut self) -> bool {
        let mut ok = self.base.reopen();
        for branch in self.branches.iter_mut().flatten() {
            branch.input.reset();
            ok &= branch.child.reopen();
        }
        ok
    }

    fn done(&mut self) {
        for branch in self.branches.iter_mut().flatten() {
            branch.child.done();
            branch.input.dispose();
        }
        self.matched.clear();
        self.inserted.clear();
        self.base.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryKeyspace;
    use crate::execution::dml::{SendDelete, SendInsert, SendUpdate};
    use crate::execution::operator::run_operator;
    use crate::expression::{field, ExprRef};
    use serde_json::json;

    fn source(values: &[Value]) -> Arc<ValueExchange> {
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(16));
        for v in values {
            assert!(input.send(AnnotatedValue::new(v.clone())));
        }
        input.close();
        input
    }

    fn rows(items: Vec<AnnotatedValue>) -> Arc<ValueExchange> {
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(16));
        for item in items {
            assert!(input.send(item));
        }
        input.close();
        input
    }

    /// Source row with the target already bound under `t`, as an outer join
    /// against the target keyspace leaves it.
    fn bound(source: Value, target: Option<(&str, Value)>) -> AnnotatedValue {
        let mut row = AnnotatedValue::new(source);
        match target {
            Some((key, doc)) => {
                row.set_field("t", doc);
                row.set_alias_meta("t", DocumentMeta::with_id(key));
            }
            None => row.set_field("t", Value::Null),
        }
        row
    }

    fn merge_into(ks: &Arc<MemoryKeyspace>, config: &PipelineConfig) -> Merge {
        merge_with(ks, Some(field("id")), None, config)
    }

    /// Clause-based MERGE: matches come from the bound target, inserts are keyed by `sid`.
    fn merge_on_clause(ks: &Arc<MemoryKeyspace>, config: &PipelineConfig) -> Merge {
        merge_with(ks, None, Some(field("sid")), config)
    }

    fn merge_with(
        ks: &Arc<MemoryKeyspace>,
        key: Option<ExprRef>,
        insert_key: Option<ExprRef>,
        config: &PipelineConfig,
    ) -> Merge {
        let plan = plan::Merge {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            key,
            update_condition: Some(field("upd")),
            delete_condition: None,
            insert: Some(plan::MergeInsert {
                key: insert_key,
                value: field("doc"),
                options: None,
                condition: None,
            }),
        };
        let update = plan::SendUpdate {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        };
        let delete = plan::SendDelete {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        };
        let insert = plan::SendInsert::from_attachment(ks.clone(), "t");
        Merge::new(
            Arc::new(plan),
            Some(Box::new(SendUpdate::new(Arc::new(update), config))),
            Some(Box::new(SendDelete::new(Arc::new(delete), config))),
            Some(Box::new(SendInsert::new(Arc::new(insert), config))),
            config,
        )
    }

    #[test]
    fn test_routes_each_row_once() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!({"v": 1})), ("b", json!({"v": 2}))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_into(&ks, &config);
        op.set_input(Some(source(&[
            json!({"id": "a", "upd": true}),
            json!({"id": "b", "upd": false}),
            json!({"id": "c", "doc": {"v": 3}}),
        ])));
        let output = op.output();
        run_operator(&mut op, &ctx, None);
        let mut forwarded = 0;
        while output.receive().is_some() {
            forwarded += 1;
        }

        assert_eq!(forwarded, 3);
        assert_eq!(op.matched_count(), 2);
        assert_eq!(op.inserted_count(), 1);
        assert_eq!(ks.get("a"), Some(json!({"v": 1})));
        assert_eq!(ks.get("b"), None);
        assert_eq!(ks.get("c"), Some(json!({"v": 3})));
        assert!(!ctx.has_errors());
        op.done();
    }

    #[test]
    fn test_second_action_on_key_is_rejected() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!({"v": 1}))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_into(&ks, &config);
        op.set_input(Some(source(&[json!({"id": "a", "upd": true}), json!({"id": "a", "upd": true})])));
        run_operator(&mut op, &ctx, None);

        let errors = ctx.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "AERO_EXEC_MERGE_MULTI_UPDATE");
        op.done();
    }

    #[test]
    fn test_own_insert_is_not_rematched() {
        let ks = MemoryKeyspace::new("t");
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_into(&ks, &config);
        op.set_input(Some(source(&[
            json!({"id": "n", "doc": {"v": 1}}),
            json!({"id": "n", "doc": {"v": 2}, "upd": true}),
        ])));
        run_operator(&mut op, &ctx, None);

        assert_eq!(op.matched_count(), 0);
        assert_eq!(ctx.errors()[0].code(), "AERO_EXEC_MERGE_MULTI_INSERT");
        assert_eq!(ks.get("n"), Some(json!({"v": 1})));
        op.done();
    }

    #[test]
    fn test_clause_merge_routes_by_bound_target() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!({"v": 1}))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_on_clause(&ks, &config);
        op.set_input(Some(rows(vec![
            bound(json!({"sid": "a", "upd": true}), Some(("a", json!({"v": 1})))),
            bound(json!({"sid": "c", "doc": {"v": 3}}), None),
        ])));
        run_operator(&mut op, &ctx, None);

        assert_eq!(op.matched_count(), 1);
        assert_eq!(op.inserted_count(), 1);
        assert_eq!(ks.get("a"), Some(json!({"v": 1})));
        assert_eq!(ks.get("c"), Some(json!({"v": 3})));
        assert!(!ctx.has_errors());
        op.done();
    }

    #[test]
    fn test_clause_merge_own_insert_is_not_rematched() {
        let ks = MemoryKeyspace::new("t");
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_on_clause(&ks, &config);
        op.set_input(Some(rows(vec![
            bound(json!({"sid": "n", "doc": {"v": 1}}), None),
            bound(json!({"sid": "n", "doc": {"v": 2}, "upd": true}), Some(("n", json!({"v": 1})))),
        ])));
        run_operator(&mut op, &ctx, None);

        assert_eq!(op.matched_count(), 0);
        assert_eq!(ctx.errors()[0].code(), "AERO_EXEC_MERGE_MULTI_INSERT");
        assert_eq!(ks.get("n"), Some(json!({"v": 1})));
        op.done();
    }

    #[test]
    fn test_clause_merge_matched_target_without_key_fails() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!({"v": 1}))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = merge_on_clause(&ks, &config);
        let mut row = AnnotatedValue::new(json!({"sid": "a", "doc": {"v": 9}}));
        row.set_field("t", json!({"v": 1}));
        op.set_input(Some(rows(vec![row])));
        run_operator(&mut op, &ctx, None);

        assert_eq!(ctx.errors()[0].code(), "AERO_EXEC_INTERNAL");
        assert_eq!(op.inserted_count(), 0);
        assert_eq!(ks.get("a"), Some(json!({"v": 1})));
        op.done();
    }
}
