//! Secondary index scan

use std::sync::Arc;

use super::driver::{drive_scan, ScanShape, ScanSource};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::datastore::ScanRequest;
use crate::execution::base::OperatorBase;
use crate::execution::eval::evaluate_count;
use crate::execution::operator::Operator;
use crate::plan;
use crate::value::AnnotatedValue;

/// Range scan over a secondary index.
///
/// Limit and offset are pushed to the index unless the scan is distinct, in
/// which case duplicates must be removed before they are counted.
#[derive(Debug)]
pub struct IndexScan {
    base: OperatorBase,
    plan: Arc<plan::IndexScan>,
}

impl IndexScan {
    pub fn new(plan: Arc<plan::IndexScan>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("IndexScan", Phase::IndexScan, config),
            plan,
        }
    }
}

impl Operator for IndexScan {
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
        let counts = evaluate_count(name, plan.limit.as_ref(), parent, ctx)
            .and_then(|limit| Ok((limit, evaluate_count(name, plan.offset.as_ref(), parent, ctx)?)));
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
        let mut request = ScanRequest::new(plan.spans.clone());
        let mut shape = ScanShape {
            covers: plan.covers.clone(),
            distinct: plan.distinct,
            limit,
            resumable: offset.is_none() && !plan.ordered && !plan.group_aggregates,
            ..ScanShape::default()
        };
        if plan.distinct {
            shape.local_offset = offset.unwrap_or(0);
        } else {
            request.limit = limit;
            request.offset = offset;
        }
        let source = ScanSource::Index {
            index: Arc::clone(&plan.index),
            request,
        };
        drive_scan(&mut self.base, ctx, source, &shape);
    }
}
