//! SendUpdate: batched update from the `clone` working copy

use std::sync::Arc;

use super::{MutationBuffer, MutationKind};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::MutationPair;
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionError;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::AnnotatedValue;

/// Writes each row's `clone` attachment over the document bound to the
/// alias. Forwarded rows carry the new document under the alias.
#[derive(Debug)]
pub struct SendUpdate {
    base: OperatorBase,
    plan: Arc<plan::SendUpdate>,
    buffer: MutationBuffer,
}

impl SendUpdate {
    pub fn new(plan: Arc<plan::SendUpdate>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("SendUpdate", Phase::Update, config),
            plan,
            buffer: MutationBuffer::default(),
        }
    }

    fn flush(&mut self, ctx: &ExecContext) -> bool {
        let keyspace = Arc::clone(&self.plan.keyspace);
        self.buffer.flush(&mut self.base, ctx, keyspace.as_ref(), MutationKind::Update)
    }
}

impl Operator for SendUpdate {
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
            buffer: MutationBuffer::default(),
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        self.buffer.start(self.base.name(), self.plan.limit.as_ref(), parent, ctx)
    }

    fn process_item(&mut self, mut item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let Some(key) = item.key_for(&self.plan.alias).map(str::to_string) else {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no document key"));
            return false;
        };
        let Some(clone) = item.attachments_mut().clone.take() else {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no updated document"));
            return false;
        };
        item.set_field(&self.plan.alias, clone.clone());
        self.buffer.push(item, MutationPair::new(key, clone));
        if self.buffer.len() >= self.base.batch_target() && !self.flush(ctx) {
            return false;
        }
        !self.buffer.exhausted()
    }

    fn after_items(&mut self, ctx: &Arc<ExecContext>) {
        if !self.base.is_stopped() {
            self.flush(ctx);
        }
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryKeyspace;
    use crate::exchange::{Exchange, ValueExchange};
    use crate::execution::operator::run_operator;
    use crate::value::DocumentMeta;
    use serde_json::json;

    fn row(key: &str, doc: serde_json::Value, updated: serde_json::Value) -> AnnotatedValue {
        let mut row = AnnotatedValue::empty_object();
        row.set_field("t", doc);
        row.set_alias_meta("t", DocumentMeta::with_id(key));
        row.attachments_mut().clone = Some(updated);
        row
    }

    #[test]
    fn test_update_writes_clone() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!({"n": 1})), ("b", json!({"n": 2}))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let plan = plan::SendUpdate {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        };
        let mut op = SendUpdate::new(Arc::new(plan), &config);
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(8));
        assert!(input.send(row("a", json!({"n": 1}), json!({"n": 10}))));
        assert!(input.send(row("missing", json!({}), json!({"n": 0}))));
        input.close();
        op.set_input(Some(input));
        let output = op.output();
        run_operator(&mut op, &ctx, None);

        let forwarded = output.receive().map(|r| r.into_value());
        assert_eq!(forwarded, Some(json!({"t": {"n": 10}})));
        assert!(output.receive().is_none());
        assert_eq!(ks.get("a"), Some(json!({"n": 10})));
        assert_eq!(ctx.mutation_count(), 1);
        assert_eq!(ctx.errors()[0].code(), "AERO_EXEC_STORAGE");
    }
}
