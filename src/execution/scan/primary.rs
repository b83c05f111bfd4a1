//! Primary index scan

use std::sync::Arc;

use super::driver::{drive_scan, ScanShape, ScanSource};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::{ScanRequest, Span};
use crate::execution::base::OperatorBase;
use crate::execution::eval::evaluate_count;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::AnnotatedValue;

/// Emits one row per document in primary key order.
#[derive(Debug)]
pub struct PrimaryScan {
    base: OperatorBase,
    plan: Arc<plan::PrimaryScan>,
}

impl PrimaryScan {
    pub fn new(plan: Arc<plan::PrimaryScan>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("PrimaryScan", Phase::PrimaryScan, config),
            plan,
        }
    }
}

impl Operator for PrimaryScan {
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
        let counts = evaluate_count(name, self.plan.limit.as_ref(), parent, ctx)
            .and_then(|limit| Ok((limit, evaluate_count(name, self.plan.offset.as_ref(), parent, ctx)?)));
        let (limit, offset) = match counts {
            Ok(counts) => counts,
            Err(err) => {
                ctx.error(err);
                return;
            }
        };
        if limit == Some(0) {
            return;
        }
        let mut request = ScanRequest::new(vec![Span::all()]);
        request.limit = limit;
        request.offset = offset;
        let source = ScanSource::Index {
            index: Arc::clone(&self.plan.index),
            request,
        };
        let shape = ScanShape {
            limit,
            resumable: offset.is_none(),
            ..ScanShape::default()
        };
        drive_scan(&mut self.base, ctx, source, &shape);
    }
}
