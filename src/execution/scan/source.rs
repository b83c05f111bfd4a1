//! Degenerate sources: dummy, expression and key scans

use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::execution::base::OperatorBase;
use crate::execution::eval::eval_error;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::{AnnotatedValue, DocumentMeta};

/// Emits a single empty row, or the parent row when driven as an inner.
#[derive(Debug)]
pub struct DummyScan {
    base: OperatorBase,
}

impl DummyScan {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("DummyScan", Phase::Pipeline, config),
        }
    }
}

impl Operator for DummyScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Self {
            base: self.base.copy(),
        })
    }

    fn execute(&mut self, _ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        let row = parent.cloned().unwrap_or_else(AnnotatedValue::empty_object);
        let _ = self.base.send(row);
    }
}

/// Unnests an array expression: one row per element, bound to the alias.
/// A non-array value yields one row; null yields none.
#[derive(Debug)]
pub struct ExpressionScan {
    base: OperatorBase,
    plan: Arc<plan::ExpressionScan>,
}

impl ExpressionScan {
    pub fn new(plan: Arc<plan::ExpressionScan>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("ExpressionScan", Phase::Pipeline, config),
            plan,
        }
    }
}

impl Operator for ExpressionScan {
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

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        let empty = AnnotatedValue::empty_object();
        let value = match self.plan.expr.evaluate(parent.unwrap_or(&empty), ctx) {
            Ok(value) => value,
            Err(err) => {
                ctx.error(eval_error(self.base.name(), err));
                return;
            }
        };
        let elements = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        };
        for element in elements {
            let mut row = AnnotatedValue::new(Value::Object(Map::new()));
            row.set_field(&self.plan.alias, element);
            if !self.base.send(row) {
                return;
            }
        }
    }
}

/// Emits one keyed row per document key (`USE KEYS`).
///
/// The keys expression yields a string or an array; non-string elements are
/// ignored.
#[derive(Debug)]
pub struct KeyScan {
    base: OperatorBase,
    plan: Arc<plan::KeyScan>,
}

impl KeyScan {
    pub fn new(plan: Arc<plan::KeyScan>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("KeyScan", Phase::KeyScan, config),
            plan,
        }
    }
}

impl Operator for KeyScan {
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

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        let empty = AnnotatedValue::empty_object();
        let keys = match self.plan.keys.evaluate(parent.unwrap_or(&empty), ctx) {
            Ok(Value::Array(items)) => items,
            Ok(Value::String(key)) => vec![Value::String(key)],
            Ok(_) => Vec::new(),
            Err(err) => {
                ctx.error(eval_error(self.base.name(), err));
                return;
            }
        };
        let mut seen = FxHashSet::default();
        for key in keys {
            let Value::String(key) = key else {
                continue;
            };
            if self.plan.distinct && !seen.insert(key.clone()) {
                continue;
            }
            let row = AnnotatedValue::with_meta(Value::Object(Map::new()), DocumentMeta::with_id(key));
            if !self.base.send(row) {
                return;
            }
        }
    }
}
