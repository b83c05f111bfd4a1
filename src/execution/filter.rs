//! Filter: passes rows whose condition is truthy

use std::sync::Arc;

use super::base::OperatorBase;
use super::eval::eval_error;
use super::operator::Operator;
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::expression::evaluate_condition;
use crate::plan;
use crate::value::AnnotatedValue;

#[derive(Debug)]
pub struct Filter {
    base: OperatorBase,
    plan: Arc<plan::Filter>,
}

impl Filter {
    pub fn new(plan: Arc<plan::Filter>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Filter", Phase::Filter, config),
            plan,
        }
    }
}

impl Operator for Filter {
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

    fn before_items(&mut self, _ctx: &Arc<ExecContext>, _parent: Option<&AnnotatedValue>) -> bool {
        // a constant-false filter never passes anything
        self.plan.condition.static_truth() != Some(false)
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        match evaluate_condition(Some(&self.plan.condition), &item, ctx) {
            Ok(true) => self.base.send(item),
            Ok(false) => true,
            Err(err) => {
                ctx.error(eval_error(self.base.name(), err));
                false
            }
        }
    }
}
