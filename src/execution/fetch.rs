//! Fetch: batched multi-key document fetch

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::base::OperatorBase;
use super::errors::ExecutionError;
use super::operator::Operator;
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::plan;
use crate::value::{AnnotatedValue, DocumentMeta};

/// Binds the document named by each row's key to the plan's alias.
///
/// Rows are batched; one multi-key fetch is issued per flush. Rows whose
/// document no longer exists are dropped.
#[derive(Debug)]
pub struct Fetch {
    base: OperatorBase,
    plan: Arc<plan::Fetch>,
}

impl Fetch {
    pub fn new(plan: Arc<plan::Fetch>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Fetch", Phase::Fetch, config),
            plan,
        }
    }

    fn flush(&mut self, ctx: &ExecContext) -> bool {
        if self.base.batch_is_empty() {
            return true;
        }
        let mut batch = self.base.take_batch();
        let keys: Vec<String> = batch
            .iter()
            .filter_map(|item| item.document_key().map(str::to_string))
            .collect();
        let keyspace = Arc::clone(&self.plan.keyspace);
        let outcome = self.base.time_service(|| keyspace.fetch(&keys));
        if !ctx.report_storage_errors(self.base.name(), outcome.errors) {
            self.base.release_batch(ctx, batch);
            return false;
        }
        let mut fetched: FxHashMap<String, (Value, DocumentMeta)> = FxHashMap::default();
        for doc in outcome.docs {
            let meta = doc.meta().cloned().unwrap_or_default();
            fetched.insert(meta.id.clone(), (doc.into_value(), meta));
        }
        let mut ok = true;
        for mut item in batch.drain(..) {
            if !ok {
                continue;
            }
            let Some(key) = item.document_key() else {
                continue;
            };
            let Some((doc, meta)) = fetched.get(key) else {
                continue;
            };
            let (doc, meta) = (doc.clone(), meta.clone());
            item.set_field(&self.plan.alias, doc);
            item.set_alias_meta(&self.plan.alias, meta);
            ok = self.base.send(item);
        }
        self.base.release_batch(ctx, batch);
        ok
    }
}

impl Operator for Fetch {
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
        })
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        if item.document_key().is_none() {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no document key"));
            return false;
        }
        self.base.batch_push(ctx, item);
        if self.base.batch_len() >= self.base.batch_target() {
            return self.flush(ctx);
        }
        true
    }

    fn after_items(&mut self, ctx: &Arc<ExecContext>) {
        if !self.base.is_stopped() {
            self.flush(ctx);
        }
    }
}
