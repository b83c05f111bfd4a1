//! Limit and Offset

use std::sync::Arc;

use super::base::OperatorBase;
use super::eval::evaluate_count;
use super::operator::Operator;
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::plan;
use crate::value::AnnotatedValue;

/// Passes the first `count` rows, then stops its input.
#[derive(Debug)]
pub struct Limit {
    base: OperatorBase,
    plan: Arc<plan::Limit>,
    remaining: u64,
}

impl Limit {
    pub fn new(plan: Arc<plan::Limit>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Limit", Phase::Pipeline, config),
            plan,
            remaining: 0,
        }
    }
}

impl Operator for Limit {
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
            remaining: 0,
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        match evaluate_count(self.base.name(), Some(&self.plan.count), parent, ctx) {
            Ok(count) => {
                self.remaining = count.unwrap_or(u64::MAX);
                self.remaining > 0
            }
            Err(err) => {
                ctx.error(err);
                false
            }
        }
    }

    fn process_item(&mut self, item: AnnotatedValue, _ctx: &Arc<ExecContext>) -> bool {
        if !self.base.send(item) {
            return false;
        }
        self.remaining -= 1;
        self.remaining > 0
    }
}

/// Drops the first `count` rows.
#[derive(Debug)]
pub struct Offset {
    base: OperatorBase,
    plan: Arc<plan::Offset>,
    to_skip: u64,
}

impl Offset {
    pub fn new(plan: Arc<plan::Offset>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Offset", Phase::Pipeline, config),
            plan,
            to_skip: 0,
        }
    }
}

impl Operator for Offset {
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
            to_skip: 0,
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        match evaluate_count(self.base.name(), Some(&self.plan.count), parent, ctx) {
            Ok(count) => {
                self.to_skip = count.unwrap_or(0);
                true
            }
            Err(err) => {
                ctx.error(err);
                false
            }
        }
    }

    fn process_item(&mut self, item: AnnotatedValue, _ctx: &Arc<ExecContext>) -> bool {
        if self.to_skip > 0 {
            self.to_skip -= 1;
            item.recycle();
            return true;
        }
        self.base.send(item)
    }
}
