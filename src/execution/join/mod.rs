//! Join and nest operators
//!
//! All three strategies share the same matching rules, implemented by
//! [`JoinMatcher`]: the ON clause is evaluated on the outer row augmented with
//! the inner document under the join alias, a post-join filter applies to
//! every emitted row, and outer joins and nests emit unmatched outer rows
//! once (joins without the alias field, nests with an empty array).

mod hash_join;
mod hash_table;
mod index_join;
mod nested_loop;

use serde_json::Value;

pub use hash_join::HashJoin;
pub use hash_table::HashTable;
pub use index_join::IndexJoin;
pub use nested_loop::NestedLoopJoin;

use super::errors::{ExecutionError, ExecutionResult};
use super::eval::eval_error;
use crate::context::{ExecContext, Phase};
use crate::expression::{evaluate_condition, ExprRef};
use crate::plan::JoinKind;
use crate::value::AnnotatedValue;

/// Operator name and phase for a join strategy and kind.
pub(crate) fn naming(strategy: &str, kind: JoinKind) -> (&'static str, Phase) {
    match (strategy, kind) {
        ("hash", JoinKind::Join) => ("HashJoin", Phase::HashJoin),
        ("hash", JoinKind::Nest) => ("HashNest", Phase::HashNest),
        ("index", JoinKind::Join) => ("IndexJoin", Phase::IndexJoin),
        ("index", JoinKind::Nest) => ("IndexNest", Phase::IndexNest),
        (_, JoinKind::Join) => ("NestedLoopJoin", Phase::Join),
        (_, JoinKind::Nest) => ("NestedLoopNest", Phase::Nest),
    }
}

/// Per-outer-row matching state.
#[derive(Debug, Clone)]
pub(crate) struct JoinMatcher {
    operator: &'static str,
    kind: JoinKind,
    alias: String,
    outer: bool,
    on_clause: Option<ExprRef>,
    filter: Option<ExprRef>,
    matches: usize,
    nested: Vec<Value>,
}

impl JoinMatcher {
    pub fn new(
        operator: &'static str,
        kind: JoinKind,
        alias: &str,
        outer: bool,
        on_clause: Option<ExprRef>,
        filter: Option<ExprRef>,
    ) -> Self {
        Self {
            operator,
            kind,
            alias: alias.to_string(),
            outer,
            on_clause,
            filter,
            matches: 0,
            nested: Vec::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn is_outer(&self) -> bool {
        self.outer
    }

    /// Whether the ON clause is known to reject every inner row.
    pub fn never_matches(&self) -> bool {
        self.on_clause.as_ref().and_then(|on| on.static_truth()) == Some(false)
    }

    /// Starts a new outer row.
    pub fn begin(&mut self) {
        self.matches = 0;
        self.nested.clear();
    }

    /// Offers one inner row. Joins return the joined row when it matches and
    /// passes the filter; nests gather the inner document and return nothing.
    pub fn offer(
        &mut self,
        outer: &AnnotatedValue,
        inner: &AnnotatedValue,
        ctx: &ExecContext,
    ) -> ExecutionResult<Option<AnnotatedValue>> {
        let Some(doc) = inner.field(&self.alias).cloned() else {
            return Err(ExecutionError::internal(
                self.operator,
                format!("join alias {} not found", self.alias),
            ));
        };
        let mut candidate = outer.clone();
        candidate.set_field(&self.alias, doc);
        if let Some(meta) = inner.alias_meta(&self.alias).or_else(|| inner.meta()) {
            candidate.set_alias_meta(&self.alias, meta.clone());
        }
        let matched = evaluate_condition(self.on_clause.as_ref(), &candidate, ctx)
            .map_err(|e| eval_error(self.operator, e))?;
        if !matched {
            return Ok(None);
        }
        self.matches += 1;
        match self.kind {
            JoinKind::Join => self.filtered(candidate, ctx),
            JoinKind::Nest => {
                if let Some(doc) = candidate.remove_field(&self.alias) {
                    self.nested.push(doc);
                }
                Ok(None)
            }
        }
    }

    /// Closes the outer row, returning what remains to emit for it.
    pub fn finish(&mut self, mut outer: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<Option<AnnotatedValue>> {
        match self.kind {
            JoinKind::Join => {
                if self.matches == 0 && self.outer {
                    self.filtered(outer, ctx)
                } else {
                    Ok(None)
                }
            }
            JoinKind::Nest => {
                if self.matches == 0 && !self.outer {
                    return Ok(None);
                }
                let nested = std::mem::take(&mut self.nested);
                outer.set_field(&self.alias, Value::Array(nested));
                self.filtered(outer, ctx)
            }
        }
    }

    fn filtered(&self, row: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<Option<AnnotatedValue>> {
        let keep = evaluate_condition(self.filter.as_ref(), &row, ctx).map_err(|e| eval_error(self.operator, e))?;
        Ok(keep.then_some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{constant, eq, field};
    use serde_json::json;

    fn inner(alias: &str, doc: Value) -> AnnotatedValue {
        let mut row = AnnotatedValue::empty_object();
        row.set_field(alias, doc);
        row
    }

    #[test]
    fn test_join_matches_and_outer_fallback() {
        let ctx = ExecContext::default();
        let on = eq(field("o.cid"), field("c.id"));
        let mut m = JoinMatcher::new("NestedLoopJoin", JoinKind::Join, "c", true, Some(on), None);
        let outer = inner("o", json!({"cid": 1}));

        m.begin();
        let hit = m.offer(&outer, &inner("c", json!({"id": 1})), &ctx).unwrap();
        assert_eq!(hit.map(|r| r.into_value()), Some(json!({"o": {"cid": 1}, "c": {"id": 1}})));
        assert_eq!(m.finish(outer.clone(), &ctx).unwrap().map(|r| r.into_value()), None);

        m.begin();
        assert!(m.offer(&outer, &inner("c", json!({"id": 2})), &ctx).unwrap().is_none());
        let fallback = m.finish(outer.clone(), &ctx).unwrap().map(|r| r.into_value());
        assert_eq!(fallback, Some(json!({"o": {"cid": 1}})));
    }

    #[test]
    fn test_nest_gathers_matches() {
        let ctx = ExecContext::default();
        let mut m = JoinMatcher::new("NestedLoopNest", JoinKind::Nest, "c", false, Some(constant(json!(true))), None);
        let outer = inner("o", json!({}));
        m.begin();
        m.offer(&outer, &inner("c", json!(1)), &ctx).unwrap();
        m.offer(&outer, &inner("c", json!(2)), &ctx).unwrap();
        let row = m.finish(outer.clone(), &ctx).unwrap().map(|r| r.into_value());
        assert_eq!(row, Some(json!({"o": {}, "c": [1, 2]})));

        m.begin();
        assert!(m.finish(outer, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_missing_alias_is_internal_error() {
        let ctx = ExecContext::default();
        let mut m = JoinMatcher::new("HashJoin", JoinKind::Join, "c", false, None, None);
        let err = m
            .offer(&AnnotatedValue::empty_object(), &AnnotatedValue::empty_object(), &ctx)
            .unwrap_err();
        assert_eq!(err.code(), "AERO_EXEC_INTERNAL");
    }
}
