//! Nested-loop join and nest
//!
//! The inner subtree is re-driven once per outer row with the outer row as
//! its parent value, so correlated inner scans see the outer bindings. Its
//! rows arrive on a private exchange together with its completion notice.

use std::sync::Arc;

use super::{naming, JoinMatcher};
use crate::context::{ExecContext, PipelineConfig};
use crate::exchange::{Exchange, Received, ValueExchange};
use crate::execution::base::{ChildLink, OperatorBase};
use crate::execution::operator::{Child, Operator};
use crate::plan;
use crate::value::AnnotatedValue;

pub struct NestedLoopJoin {
    base: OperatorBase,
    plan: Arc<plan::NestedLoop>,
    inner: Child,
    inbox: Arc<ValueExchange>,
    matcher: JoinMatcher,
    driven: bool,
    token: Option<u64>,
}

impl NestedLoopJoin {
    pub fn new(inner: Box<dyn Operator>, plan: Arc<plan::NestedLoop>, config: &PipelineConfig) -> Self {
        let (name, phase) = naming("nested", plan.kind);
        let base = OperatorBase::new(name, phase, config);
        let inbox: Arc<ValueExchange> = Arc::new(Exchange::new(config.pipeline_capacity));
        let inner = Self::wire(inner, &inbox, &base);
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
            inner,
            inbox,
            matcher,
            driven: false,
            token: None,
        }
    }

    fn wire(mut inner: Box<dyn Operator>, inbox: &Arc<ValueExchange>, base: &OperatorBase) -> Child {
        inner.set_output(inbox.clone(), false);
        inner.set_parent_link(Some(ChildLink::new(inbox.clone(), 0)));
        let child = Child::new(inner);
        base.adopt(&child);
        child
    }

    /// Runs the inner subtree for one outer row. Returns `false` if the join
    /// must end early.
    fn drive_inner(&mut self, outer: &AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        if self.driven {
            self.inbox.reset();
            if !self.inner.reopen() {
                return false;
            }
        }
        self.driven = true;
        if !self.inner.start(ctx, Some(outer)) {
            return false;
        }
        // a stop that landed while the inner was being reset must still reach it
        if self.base.is_stopped() {
            self.inner.stop();
        }
        let mut keep_going = true;
        loop {
            match self.inbox.receive_or_child() {
                Received::Item(row) => {
                    match self.matcher.offer(outer, &row, ctx) {
                        Ok(Some(joined)) => {
                            if !self.base.send(joined) {
                                keep_going = false;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            ctx.error(err);
                            keep_going = false;
                        }
                    }
                    row.recycle();
                    if !keep_going {
                        break;
                    }
                }
                Received::Child(_) => break,
                Received::Closed | Received::Stopped => {
                    keep_going = false;
                    break;
                }
            }
        }
        if !keep_going {
            self.inner.stop();
        }
        self.inner.wait();
        keep_going
    }
}

impl std::fmt::Debug for NestedLoopJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.base.name())
            .field("alias", &self.plan.alias)
            .field("outer", &self.plan.outer)
            .field("inner", &self.inner)
            .finish()
    }
}

impl Operator for NestedLoopJoin {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let inbox: Arc<ValueExchange> = Arc::new(Exchange::new(self.inbox.capacity()));
        let inner = Self::wire(self.inner.copy_op(), &inbox, &base);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            inner,
            inbox,
            matcher: self.matcher.clone(),
            driven: false,
            token: None,
        })
    }

    fn before_items(&mut self, _ctx: &Arc<ExecContext>, _parent: Option<&AnnotatedValue>) -> bool {
        // an inner join whose ON clause can never hold produces nothing
        if self.matcher.never_matches() && !self.matcher.is_outer() {
            return false;
        }
        self.token = Some(self.base.stop_handle().attach(self.inbox.clone()));
        true
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        self.matcher.begin();
        if !self.matcher.never_matches() && !self.drive_inner(&item, ctx) {
            return false;
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

    fn after_items(&mut self, _ctx: &Arc<ExecContext>) {
        if self.inner.is_running() {
            self.inner.stop();
            self.inner.wait();
        }
        if let Some(token) = self.token.take() {
            self.base.stop_handle().detach(token);
        }
    }

    fn children(&self) -> Vec<&Child> {
        vec![&self.inner]
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        vec![&mut self.inner]
    }

    fn reopen(&mut self) -> bool {
        self.inbox.reset();
        self.driven = false;
        self.base.reopen() && self.inner.reopen()
    }

    fn done(&mut self) {
        self.inner.done();
        self.inbox.dispose();
        self.base.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operator::run_operator;
    use crate::execution::scan::ExpressionScan;
    use crate::expression::{constant, eq, field};
    use crate::plan::JoinKind;
    use serde_json::{json, Value};

    fn outer_rows(values: &[Value]) -> Arc<ValueExchange> {
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(16));
        for v in values {
            assert!(input.send(AnnotatedValue::new(json!({ "o": v }))));
        }
        input.close();
        input
    }

    fn inner_scan(config: &PipelineConfig) -> Box<dyn Operator> {
        let plan = plan::ExpressionScan {
            expr: constant(json!([{"id": 1}, {"id": 2}, {"id": 2}])),
            alias: "c".to_string(),
        };
        Box::new(ExpressionScan::new(Arc::new(plan), config))
    }

    fn run(plan: plan::NestedLoop, outer: &[Value]) -> Vec<Value> {
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = NestedLoopJoin::new(inner_scan(&config), Arc::new(plan), &config);
        op.set_input(Some(outer_rows(outer)));
        let output = op.output();
        run_operator(&mut op, &ctx, None);
        let mut rows = Vec::new();
        while let Some(row) = output.receive() {
            rows.push(row.into_value());
        }
        op.done();
        assert!(!ctx.has_errors(), "{:?}", ctx.errors());
        rows
    }

    fn nested_loop(kind: JoinKind, outer: bool) -> plan::NestedLoop {
        plan::NestedLoop {
            kind,
            alias: "c".to_string(),
            outer,
            on_clause: Some(eq(field("o"), field("c.id"))),
            filter: None,
        }
    }

    #[test]
    fn test_inner_join_reruns_inner_per_outer_row() {
        let rows = run(nested_loop(JoinKind::Join, false), &[json!(1), json!(2), json!(3)]);
        assert_eq!(
            rows,
            vec![
                json!({"o": 1, "c": {"id": 1}}),
                json!({"o": 2, "c": {"id": 2}}),
                json!({"o": 2, "c": {"id": 2}}),
            ]
        );
    }

    #[test]
    fn test_outer_join_keeps_unmatched() {
        let rows = run(nested_loop(JoinKind::Join, true), &[json!(3)]);
        assert_eq!(rows, vec![json!({"o": 3})]);
    }

    #[test]
    fn test_nest_collects_array() {
        let rows = run(nested_loop(JoinKind::Nest, true), &[json!(2), json!(5)]);
        assert_eq!(
            rows,
            vec![json!({"o": 2, "c": [{"id": 2}, {"id": 2}]}), json!({"o": 5, "c": []})]
        );
    }

    #[test]
    fn test_static_false_on_clause() {
        let mut plan = nested_loop(JoinKind::Join, true);
        plan.on_clause = Some(constant(json!(false)));
        assert_eq!(run(plan.clone(), &[json!(1), json!(2)]).len(), 2);
        plan.outer = false;
        assert!(run(plan, &[json!(1), json!(2)]).is_empty());
    }
}
