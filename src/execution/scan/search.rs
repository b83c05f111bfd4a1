//! Full-text search scan

use std::sync::Arc;

use super::driver::{drive_scan, ScanShape, ScanSource};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::SearchRequest;
use crate::execution::base::OperatorBase;
use crate::execution::eval::{eval_error, evaluate_count};
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::AnnotatedValue;

/// Emits one row per search hit with the hit's metadata attached.
/// Search scans cannot resume, so a timeout is fatal.
#[derive(Debug)]
pub struct SearchScan {
    base: OperatorBase,
    plan: Arc<plan::SearchScan>,
}

impl SearchScan {
    pub fn new(plan: Arc<plan::SearchScan>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("SearchScan", Phase::SearchScan, config),
            plan,
        }
    }
}

impl Operator for SearchScan {
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
        let name = self.base.name();
        let plan = &self.plan;
        let empty = AnnotatedValue::empty_object();
        let query = match plan.query.evaluate(parent.unwrap_or(&empty), ctx) {
            Ok(query) => query,
            Err(err) => {
                ctx.error(eval_error(name, err));
                return;
            }
        };
        let counts = evaluate_count(name, plan.limit.as_ref(), parent, ctx)
            .and_then(|limit| Ok((limit, evaluate_count(name, plan.offset.as_ref(), parent, ctx)?)));
        let (limit, offset) = match counts {
            Ok(counts) => counts,
            Err(err) => {
                ctx.error(err);
                return;
            }
        };
        let source = ScanSource::Search {
            index: Arc::clone(&plan.index),
            request: SearchRequest { query, offset, limit },
        };
        let shape = ScanShape {
            limit,
            ..ScanShape::default()
        };
        drive_scan(&mut self.base, ctx, source, &shape);
    }
}
