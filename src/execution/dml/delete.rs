//! SendDelete: batched delete

use std::sync::Arc;

use serde_json::Value;

use super::{MutationBuffer, MutationKind};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::MutationPair;
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionError;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::AnnotatedValue;

/// Deletes the document bound to the alias of each row and forwards the
/// rows whose document was actually removed.
#[derive(Debug)]
pub struct SendDelete {
    base: OperatorBase,
    plan: Arc<plan::SendDelete>,
    buffer: MutationBuffer,
}

impl SendDelete {
    pub fn new(plan: Arc<plan::SendDelete>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("SendDelete", Phase::Delete, config),
            plan,
            buffer: MutationBuffer::default(),
        }
    }

    fn flush(&mut self, ctx: &ExecContext) -> bool {
        let keyspace = Arc::clone(&self.plan.keyspace);
        self.buffer.flush(&mut self.base, ctx, keyspace.as_ref(), MutationKind::Delete)
    }
}

impl Operator for SendDelete {
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

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let Some(key) = item.key_for(&self.plan.alias).map(str::to_string) else {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no document key"));
            return false;
        };
        self.buffer.push(item, MutationPair::new(key, Value::Null));
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

    #[test]
    fn test_delete_skips_absent_keys() {
        let ks = MemoryKeyspace::with_docs("t", vec![("a", json!(1)), ("b", json!(2))]);
        let config = PipelineConfig::default();
        let ctx = Arc::new(ExecContext::new(config.clone()));
        let plan = plan::SendDelete {
            keyspace: ks.clone(),
            alias: "t".to_string(),
            limit: None,
        };
        let mut op = SendDelete::new(Arc::new(plan), &config);
        let input: Arc<ValueExchange> = Arc::new(Exchange::new(8));
        for key in ["a", "zz"] {
            assert!(input.send(AnnotatedValue::with_meta(json!({}), DocumentMeta::with_id(key))));
        }
        input.close();
        op.set_input(Some(input));
        let output = op.output();
        run_operator(&mut op, &ctx, None);

        assert_eq!(output.receive().and_then(|r| r.document_key().map(str::to_string)), Some("a".to_string()));
        assert!(output.receive().is_none());
        assert_eq!(ks.keys(), vec!["b".to_string()]);
        assert_eq!(ctx.mutation_count(), 1);
        assert!(!ctx.has_errors());
    }
}
