//! Index join and nest
//!
//! Each outer row's key expression is looked up in a secondary index of the
//! inner keyspace. A covering join builds the inner document from the entry
//! keys alone; otherwise the matching primary keys of several outer rows are
//! fetched together in one batched call.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};

use super::{naming, JoinMatcher};
use crate::context::{ExecContext, PipelineConfig};
use crate::datastore::{IndexEntry, ScanRequest, Span};
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionError;
use crate::execution::eval::eval_error;
use crate::execution::operator::Operator;
use crate::execution::scan::scan_entries;
use crate::execution::set::set_path;
use crate::plan;
use crate::value::{AnnotatedValue, DocumentMeta};

pub struct IndexJoin {
    base: OperatorBase,
    plan: Arc<plan::IndexJoin>,
    matcher: JoinMatcher,
    /// Outer rows waiting for the next fetch, with their inner keys
    pending: Vec<(AnnotatedValue, Vec<String>)>,
    pending_keys: usize,
    /// Keys already reported missing during this run
    missing: FxHashSet<String>,
}

impl IndexJoin {
    pub fn new(plan: Arc<plan::IndexJoin>, config: &PipelineConfig) -> Self {
        let (name, phase) = naming("index", plan.kind);
        let matcher = JoinMatcher::new(name, plan.kind, &plan.alias, plan.outer, plan.on_clause.clone(), None);
        Self {
            base: OperatorBase::new(name, phase, config),
            plan,
            matcher,
            pending: Vec::new(),
            pending_keys: 0,
            missing: FxHashSet::default(),
        }
    }

    fn is_covering(&self) -> bool {
        !self.plan.covers.is_empty()
    }

    /// Index entries matching the outer row's join key.
    fn lookup(&mut self, outer: &AnnotatedValue, ctx: &Arc<ExecContext>) -> Option<Vec<IndexEntry>> {
        let key = match self.plan.key_expr.evaluate(outer, ctx) {
            Ok(key) => key,
            Err(err) => {
                ctx.error(eval_error(self.base.name(), err));
                return None;
            }
        };
        if key.is_null() {
            return Some(Vec::new());
        }
        let request = ScanRequest::new(vec![Span::exact(vec![key])]);
        let index = Arc::clone(&self.plan.index);
        scan_entries(&mut self.base, ctx, &index, request)
    }

    fn covered_row(&self, entry: &IndexEntry) -> AnnotatedValue {
        let mut doc = Value::Object(Map::new());
        for (cover, value) in self.plan.covers.iter().zip(entry.entry_key.iter()) {
            set_path(&mut doc, cover, value.clone());
        }
        let mut row = AnnotatedValue::empty_object();
        row.set_field(&self.plan.alias, doc);
        row.set_alias_meta(&self.plan.alias, DocumentMeta::with_id(entry.primary_key.clone()));
        row
    }

    /// Offers inner rows for one outer row and emits the results.
    fn emit(&mut self, outer: AnnotatedValue, inner: &[AnnotatedValue], ctx: &ExecContext) -> bool {
        self.matcher.begin();
        for row in inner {
            match self.matcher.offer(&outer, row, ctx) {
                Ok(Some(joined)) => {
                    if !self.base.send(joined) {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    ctx.error(err);
                    return false;
                }
            }
        }
        match self.matcher.finish(outer, ctx) {
            Ok(Some(row)) => self.base.send(row),
            Ok(None) => true,
            Err(err) => {
                ctx.error(err);
                false
            }
        }
    }

    fn flush(&mut self, ctx: &ExecContext) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let pending = std::mem::take(&mut self.pending);
        self.pending_keys = 0;
        let mut seen = FxHashSet::default();
        let keys: Vec<String> = pending
            .iter()
            .flat_map(|(_, keys)| keys.iter())
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect();
        let keyspace = Arc::clone(&self.plan.keyspace);
        let outcome = self.base.time_service(|| keyspace.fetch(&keys));
        if !ctx.report_storage_errors(self.base.name(), outcome.errors) {
            return false;
        }
        let mut fetched: FxHashMap<String, AnnotatedValue> = FxHashMap::default();
        for doc in outcome.docs {
            let meta = doc.meta().cloned().unwrap_or_default();
            let mut row = AnnotatedValue::empty_object();
            row.set_field(&self.plan.alias, doc.into_value());
            row.set_alias_meta(&self.plan.alias, meta.clone());
            fetched.insert(meta.id, row);
        }
        for (outer, keys) in pending {
            let mut inner = Vec::with_capacity(keys.len());
            for key in keys {
                match fetched.get(&key) {
                    Some(row) => inner.push(row.clone()),
                    None => {
                        if self.missing.insert(key.clone()) {
                            ctx.warning(ExecutionError::missing_key(keyspace.name(), key));
                        }
                    }
                }
            }
            if !self.emit(outer, &inner, ctx) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for IndexJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.base.name())
            .field("alias", &self.plan.alias)
            .field("index", &self.plan.index.name())
            .field("covering", &self.is_covering())
            .finish()
    }
}

impl Operator for IndexJoin {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
            matcher: self.matcher.clone(),
            pending: Vec::new(),
            pending_keys: 0,
            missing: FxHashSet::default(),
        })
    }

    fn before_items(&mut self, _ctx: &Arc<ExecContext>, _parent: Option<&AnnotatedValue>) -> bool {
        self.missing.clear();
        !(self.matcher.never_matches() && !self.matcher.is_outer())
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let entries = if self.matcher.never_matches() {
            Vec::new()
        } else {
            match self.lookup(&item, ctx) {
                Some(entries) => entries,
                None => return false,
            }
        };
        if self.is_covering() {
            let inner: Vec<AnnotatedValue> = entries.iter().map(|e| self.covered_row(e)).collect();
            return self.emit(item, &inner, ctx);
        }
        let keys: Vec<String> = entries.into_iter().map(|e| e.primary_key).collect();
        self.pending_keys += keys.len().max(1);
        self.pending.push((item, keys));
        if self.pending_keys >= self.base.batch_target() {
            return self.flush(ctx);
        }
        true
    }

    fn after_items(&mut self, ctx: &Arc<ExecContext>) {
        if !self.base.is_stopped() {
            self.flush(ctx);
        }
        self.pending.clear();
        self.pending_keys = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{MemoryIndex, MemoryKeyspace};
    use crate::exchange::{Exchange, ValueExchange};
    use crate::execution::operator::run_operator;
    use crate::expression::field;
    use crate::plan::JoinKind;
    use serde_json::json;

    fn customers() -> Arc<MemoryKeyspace> {
        MemoryKeyspace::with_docs(
            "customers",
            vec![
                ("c1".to_string(), json!({"region": "east", "name": "ann"})),
                ("c2".to_string(), json!({"region": "west", "name": "bo"})),
                ("c3".to_string(), json!({"region": "east", "name": "cy"})),
            ],
        )
    }

    fn run(plan: plan::IndexJoin, outer: &[Value]) -> (Vec<Value>, Arc<ExecContext>) {
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let mut op = IndexJoin::new(Arc::new(plan), &config);
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(16));
        for v in outer {
            assert!(input.send(AnnotatedValue::new(json!({ "o": v }))));
        }
        input.close();
        op.set_input(Some(input));
        let output = op.output();
        run_operator(&mut op, &ctx, None);
        let mut rows = Vec::new();
        while let Some(row) = output.receive() {
            rows.push(row.into_value());
        }
        op.done();
        (rows, ctx)
    }

    fn join_plan(ks: &Arc<MemoryKeyspace>, kind: JoinKind, outer: bool, covers: &[&str]) -> plan::IndexJoin {
        let index = MemoryIndex::on_fields("by_region", ks.clone(), &["region"]);
        plan::IndexJoin {
            kind,
            alias: "c".to_string(),
            outer,
            keyspace: ks.clone(),
            index,
            key_expr: field("o"),
            covers: covers.iter().map(|c| c.to_string()).collect(),
            on_clause: None,
        }
    }

    #[test]
    fn test_index_join_fetches_matches() {
        let ks = customers();
        let (rows, ctx) = run(join_plan(&ks, JoinKind::Join, true, &[]), &[json!("east"), json!("north")]);
        let names: Vec<_> = rows.iter().map(|r| r["c"]["name"].clone()).collect();
        assert_eq!(names, vec![json!("ann"), json!("cy"), Value::Null]);
        assert_eq!(rows[2], json!({"o": "north"}));
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_covering_nest_skips_fetch() {
        let ks = customers();
        let (rows, _) = run(join_plan(&ks, JoinKind::Nest, false, &["region"]), &[json!("west")]);
        assert_eq!(rows, vec![json!({"o": "west", "c": [{"region": "west"}]})]);
        assert_eq!(ks.fetch_calls(), 0);
    }

    #[test]
    fn test_vanished_document_reported_once() {
        // the index still lists c2 but the keyspace no longer holds it
        let indexed = customers();
        let live = customers();
        live.remove("c2");
        let mut plan = join_plan(&indexed, JoinKind::Join, false, &[]);
        plan.keyspace = live;
        let (rows, ctx) = run(plan, &[json!("west"), json!("west")]);
        assert!(rows.is_empty());
        let warnings = ctx.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code(), "AERO_EXEC_MISSING_KEY");
    }
}
