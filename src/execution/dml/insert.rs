//! SendInsert: batched insert or upsert

use std::sync::Arc;

use serde_json::Value;

use super::{MutationBuffer, MutationKind};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::MutationPair;
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionError;
use crate::execution::eval::eval_error;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::{AnnotatedValue, DocumentMeta, InsertPayload};

/// Writes one new document per input row.
///
/// Key, value and options come from the plan's expressions when it has
/// them, otherwise from the row's `insert` attachment. Each forwarded row is
/// the written document bound to the alias.
#[derive(Debug)]
pub struct SendInsert {
    base: OperatorBase,
    plan: Arc<plan::SendInsert>,
    buffer: MutationBuffer,
}

impl SendInsert {
    pub fn new(plan: Arc<plan::SendInsert>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("SendInsert", Phase::Insert, config),
            plan,
            buffer: MutationBuffer::default(),
        }
    }

    fn kind(&self) -> MutationKind {
        if self.plan.upsert {
            MutationKind::Upsert
        } else {
            MutationKind::Insert
        }
    }

    /// The payload for one row. `Ok(None)` skips the row.
    fn payload(&self, item: &AnnotatedValue, ctx: &ExecContext) -> Result<Option<InsertPayload>, ExecutionError> {
        let name = self.base.name();
        let Some(key_expr) = &self.plan.key else {
            return match &item.attachments().insert {
                Some(payload) => Ok(Some(payload.clone())),
                None => Err(ExecutionError::internal(name, "row carries no insert payload")),
            };
        };
        let key = match key_expr.evaluate(item, ctx).map_err(|e| eval_error(name, e))? {
            Value::String(key) => key,
            Value::Null => return Ok(None),
            other => {
                ctx.error(ExecutionError::evaluation(name, format!("document key must be a string, got {other}")));
                return Ok(None);
            }
        };
        let value = match &self.plan.value {
            Some(expr) => expr.evaluate(item, ctx).map_err(|e| eval_error(name, e))?,
            None => item.value().clone(),
        };
        let options = match &self.plan.options {
            Some(expr) => match expr.evaluate(item, ctx).map_err(|e| eval_error(name, e))? {
                Value::Null => None,
                options @ Value::Object(_) => Some(options),
                other => {
                    ctx.error(ExecutionError::evaluation(name, format!("insert options must be an object, got {other}")));
                    return Ok(None);
                }
            },
            None => None,
        };
        Ok(Some(InsertPayload { key, value, options }))
    }

    fn flush(&mut self, ctx: &ExecContext) -> bool {
        let kind = self.kind();
        let keyspace = Arc::clone(&self.plan.keyspace);
        self.buffer.flush(&mut self.base, ctx, keyspace.as_ref(), kind)
    }
}

impl Operator for SendInsert {
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
        let payload = match self.payload(&item, ctx) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                item.recycle();
                return true;
            }
            Err(err) => {
                let internal = err.is_fatal();
                ctx.error(err);
                item.recycle();
                return !internal;
            }
        };
        item.recycle();
        let mut row = AnnotatedValue::empty_object();
        row.set_field(&self.plan.alias, payload.value.clone());
        row.set_alias_meta(&self.plan.alias, DocumentMeta::with_id(payload.key.clone()));
        let pair = MutationPair {
            key: payload.key,
            value: payload.value,
            options: payload.options,
        };
        self.buffer.push(row, pair);
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
