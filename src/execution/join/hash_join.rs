//! Hash join and nest
//!
//! The build side is drained into a [`HashTable`] before the first probe
//! row is read. Equal hash keys are necessary but not sufficient, so the ON
//! clause is re-evaluated on every candidate.

use std::sync::Arc;

use serde_json::Value;

use super::{naming, HashTable, JoinMatcher};
use crate::context::{ExecContext, PipelineConfig};
use crate::exchange::Exchange;
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionResult;
use crate::execution::eval::eval_error;
use crate::execution::operator::{Child, Operator};
use crate::expression::{evaluate_all, ExprRef};
use crate::observability::{log_event_with_fields, Event};
use crate::plan;
use crate::value::AnnotatedValue;

pub struct HashJoin {
    base: OperatorBase,
    plan: Arc<plan::HashJoin>,
    build: Child,
    table: HashTable,
    matcher: JoinMatcher,
}

/// Evaluates a composite join key. `None` when any part is null, since null
/// never equals anything.
fn join_key(
    operator: &str,
    exprs: &[ExprRef],
    row: &AnnotatedValue,
    ctx: &ExecContext,
) -> ExecutionResult<Option<Vec<Value>>> {
    let key = evaluate_all(exprs, row, ctx).map_err(|e| eval_error(operator, e))?;
    if key.iter().any(Value::is_null) {
        return Ok(None);
    }
    Ok(Some(key))
}

impl HashJoin {
    pub fn new(build: Box<dyn Operator>, plan: Arc<plan::HashJoin>, config: &PipelineConfig) -> Self {
        let (name, phase) = naming("hash", plan.kind);
        let base = OperatorBase::new(name, phase, config);
        let build = Child::new(build);
        base.adopt(&build);
        let matcher = JoinMatcher::new(
            name,
            plan.kind,
            &plan.alias,
            plan.outer,
            plan.on_clause.clone(),
            plan.filter.clone(),
        );
        Self {
            base,
            plan,
            build,
            table: HashTable::new(),
            matcher,
        }
    }

    /// Number of rows currently held by the build table.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    fn build_table(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> ExecutionResult<bool> {
        if !self.build.start(ctx, parent) {
            return Ok(false);
        }
        let source = self.build.output();
        while let Some(row) = self.base.time_service(|| source.receive()) {
            if self.base.is_stopped() {
                return Ok(false);
            }
            let Some(key) = join_key(self.base.name(), &self.plan.build_exprs, &row, ctx)? else {
                row.recycle();
                continue;
            };
            self.table.insert(key, row, ctx)?;
        }
        self.build.wait();
        let rows = self.table.len().to_string();
        log_event_with_fields(Event::HashTableBuilt, &[("operator", self.base.name()), ("rows", &rows)]);
        Ok(!self.base.is_stopped())
    }

    fn release(&mut self, ctx: &ExecContext) {
        if self.build.is_running() {
            self.build.stop();
            self.build.wait();
        }
        self.table.clear(ctx);
    }
}

impl std::fmt::Debug for HashJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.base.name())
            .field("alias", &self.plan.alias)
            .field("outer", &self.plan.outer)
            .field("build", &self.build)
            .field("table_len", &self.table.len())
            .finish()
    }
}

impl Operator for HashJoin {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let mut build = Child::new(self.build.copy_op());
        build.set_output(Arc::new(Exchange::new(self.build.output().capacity())), true);
        base.adopt(&build);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            build,
            table: HashTable::new(),
            matcher: self.matcher.clone(),
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        match self.build_table(ctx, parent) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                ctx.error(err);
                return false;
            }
        }
        // nothing can match an empty build side
        !(self.table.is_empty() && !self.matcher.is_outer())
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        self.matcher.begin();
        let key = match join_key(self.base.name(), &self.plan.probe_exprs, &item, ctx) {
            Ok(key) => key,
            Err(err) => {
                ctx.error(err);
                return false;
            }
        };
        let mut joined = Vec::new();
        if let Some(key) = key {
            for candidate in self.table.probe(&key) {
                match self.matcher.offer(&item, candidate, ctx) {
                    Ok(Some(row)) => joined.push(row),
                    Ok(None) => {}
                    Err(err) => {
                        ctx.error(err);
                        return false;
                    }
                }
            }
        }
        for row in joined {
            if !self.base.send(row) {
                return false;
            }
        }
        match self.matcher.finish(item, ctx) {
            Ok(Some(row)) => self.base.send(row),
            Ok(None) => true,
            Err(err) => {
                ctx.error(err);
                false
            }
        }
    }

    fn after_items(&mut self, ctx: &Arc<ExecContext>) {
        self.release(ctx);
    }

    fn children(&self) -> Vec<&Child> {
        vec![&self.build]
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        vec![&mut self.build]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ValueExchange;
    use crate::execution::operator::run_operator;
    use crate::execution::scan::ExpressionScan;
    use crate::expression::{constant, field};
    use crate::plan::JoinKind;
    use serde_json::json;

    fn build_side(config: &PipelineConfig, docs: Value) -> Box<dyn Operator> {
        let plan = plan::ExpressionScan {
            expr: constant(docs),
            alias: "c".to_string(),
        };
        Box::new(ExpressionScan::new(Arc::new(plan), config))
    }

    fn probe_input(values: &[Value]) -> Arc<ValueExchange> {
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(16));
        for v in values {
            assert!(input.send(AnnotatedValue::new(json!({ "o": v }))));
        }
        input.close();
        input
    }

    fn hash_plan(kind: JoinKind, outer: bool) -> plan::HashJoin {
        plan::HashJoin {
            kind,
            alias: "c".to_string(),
            outer,
            build_exprs: vec![field("c.id")],
            probe_exprs: vec![field("o")],
            on_clause: None,
            filter: None,
        }
    }

    fn run(plan: plan::HashJoin, build: Value, probe: &[Value]) -> (Vec<Value>, Arc<ExecContext>) {
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = HashJoin::new(build_side(&config, build), Arc::new(plan), &config);
        op.set_input(Some(probe_input(probe)));
        let output = op.output();
        run_operator(&mut op, &ctx, None);
        let mut rows = Vec::new();
        while let Some(row) = output.receive() {
            rows.push(row.into_value());
        }
        assert_eq!(op.table_len(), 0);
        op.done();
        (rows, ctx)
    }

    #[test]
    fn test_hash_join_matches_and_releases_quota() {
        let build = json!([{"id": 1}, {"id": 2}, {"id": 2}, {"id": null}]);
        let (rows, ctx) = run(hash_plan(JoinKind::Join, false), build, &[json!(2), json!(3), json!(null)]);
        assert_eq!(rows, vec![json!({"o": 2, "c": {"id": 2}}), json!({"o": 2, "c": {"id": 2}})]);
        assert_eq!(ctx.quota().used(), 0);
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_hash_nest_outer() {
        let build = json!([{"id": 1}, {"id": 1}]);
        let (rows, _) = run(hash_plan(JoinKind::Nest, true), build, &[json!(1), json!(4)]);
        assert_eq!(
            rows,
            vec![json!({"o": 1, "c": [{"id": 1}, {"id": 1}]}), json!({"o": 4, "c": []})]
        );
    }

    #[test]
    fn test_empty_build_side_short_circuits() {
        let (rows, _) = run(hash_plan(JoinKind::Join, false), json!([]), &[json!(1), json!(2)]);
        assert!(rows.is_empty());
        let (rows, _) = run(hash_plan(JoinKind::Join, true), json!([]), &[json!(1)]);
        assert_eq!(rows, vec![json!({"o": 1})]);
    }
}
