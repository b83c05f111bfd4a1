//! Parallel: N replicas of one child feeding the same output

use std::sync::Arc;

use super::base::{ChildLink, OperatorBase};
use super::operator::{Child, Operator};
use super::stats::OperatorStats;
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, ValueExchange};
use crate::value::AnnotatedValue;

/// Replicates its child `min(max_parallelism, request parallelism)` times.
///
/// Replicas share the child's input exchange and the parallel's output, which
/// the parallel owns and closes once every replica has posted completion.
pub struct Parallel {
    base: OperatorBase,
    max_parallelism: usize,
    template: Box<dyn Operator>,
    replicas: Vec<Child>,
    inbox: Arc<ValueExchange>,
    replicas_done: usize,
}

impl Parallel {
    pub fn new(child: Box<dyn Operator>, max_parallelism: usize, config: &PipelineConfig) -> Self {
        let base = OperatorBase::new("Parallel", Phase::Pipeline, config);
        let mut template = child;
        template.set_output(base.output().clone(), false);
        Self {
            base,
            max_parallelism: max_parallelism.max(1),
            template,
            replicas: Vec::new(),
            inbox: Arc::new(Exchange::new(1)),
            replicas_done: 0,
        }
    }

    /// Replicas torn down so far.
    pub fn replicas_done(&self) -> usize {
        self.replicas_done
    }

    fn release_replicas(&mut self) {
        for replica in &mut self.replicas {
            replica.done();
            self.replicas_done += 1;
        }
        self.replicas.clear();
        self.base.stop_handle().clear_children();
    }
}

impl Operator for Parallel {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let mut template = self.template.copy();
        template.set_output(base.output().clone(), false);
        Box::new(Self {
            base,
            max_parallelism: self.max_parallelism,
            template,
            replicas: Vec::new(),
            inbox: Arc::new(Exchange::new(1)),
            replicas_done: 0,
        })
    }

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        let n = self.max_parallelism.min(ctx.max_parallelism()).max(1);
        self.release_replicas();
        for i in 0..n {
            let mut replica = Child::new(self.template.copy());
            replica.set_parent_link(Some(ChildLink::new(self.inbox.clone(), i)));
            self.base.adopt(&replica);
            self.replicas.push(replica);
        }
        if self.base.stop_handle().is_requested() {
            return;
        }
        let token = self.base.stop_handle().attach(self.inbox.clone());
        let mut started = 0;
        for replica in &mut self.replicas {
            if replica.start(ctx, parent) {
                started += 1;
            }
        }
        let mut completed = 0;
        while completed < started {
            if self.inbox.receive_child().is_none() {
                self.base.mark_stopping();
                break;
            }
            completed += 1;
        }
        for replica in &mut self.replicas {
            replica.wait();
        }
        self.base.stop_handle().detach(token);
    }

    fn children(&self) -> Vec<&Child> {
        self.replicas.iter().collect()
    }

    fn stats(&self) -> OperatorStats {
        let mut stats = self.base.stats();
        stats.children = if self.replicas.is_empty() {
            vec![self.template.stats()]
        } else {
            self.replicas.iter().map(Child::stats).collect()
        };
        stats
    }

    fn set_input(&mut self, input: Option<Arc<ValueExchange>>) {
        self.base.set_input(input.clone());
        self.template.set_input(input);
    }

    fn set_bit(&mut self, bit: u64) {
        self.template.set_bit(bit);
    }

    fn set_output(&mut self, output: Arc<ValueExchange>, owned: bool) {
        self.template.set_output(output.clone(), false);
        self.base.set_output(output, owned);
    }

    fn reopen(&mut self) -> bool {
        self.release_replicas();
        self.inbox.reset();
        self.base.reopen() && self.template.reopen()
    }

    fn done(&mut self) {
        self.release_replicas();
        self.template.done();
        self.inbox.dispose();
        self.base.done();
    }
}
