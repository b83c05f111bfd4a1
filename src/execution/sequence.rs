//! Sequence: a chain of operators connected output to input

use std::sync::Arc;

use super::base::OperatorBase;
use super::operator::{Child, Operator};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, ValueExchange};
use crate::value::AnnotatedValue;

/// Runs its children concurrently, child *i* feeding child *i + 1*.
///
/// The sequence's output is its last child's output and its input is its
/// first child's input. It completes once every child has completed.
#[derive(Debug)]
pub struct Sequence {
    base: OperatorBase,
    children: Vec<Child>,
}

impl Sequence {
    pub fn new(children: Vec<Box<dyn Operator>>, config: &PipelineConfig) -> Self {
        let mut children: Vec<Child> = children.into_iter().map(Child::new).collect();
        Self::wire(&mut children);
        let base = match children.last() {
            Some(last) => OperatorBase::with_output("Sequence", Phase::Pipeline, last.output(), false, config),
            None => OperatorBase::new("Sequence", Phase::Pipeline, config),
        };
        for child in &children {
            base.adopt(child);
        }
        Self { base, children }
    }

    fn wire(children: &mut [Child]) {
        for i in 1..children.len() {
            let upstream = children[i - 1].output();
            children[i].set_input(Some(upstream));
        }
    }
}

impl Operator for Sequence {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let n = self.children.len();
        let mut children: Vec<Child> = Vec::with_capacity(n);
        for (i, child) in self.children.iter().enumerate() {
            let mut copy = Child::new(child.copy_op());
            if i + 1 < n {
                // internal links are private to each copy
                let private: Arc<ValueExchange> = Arc::new(Exchange::new(child.output().capacity()));
                copy.set_output(private, true);
            }
            children.push(copy);
        }
        Self::wire(&mut children);
        let base = self.base.copy();
        for child in &children {
            base.adopt(child);
        }
        Box::new(Self { base, children })
    }

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        for child in &mut self.children {
            child.start(ctx, parent);
        }
        for child in &mut self.children {
            child.wait();
        }
        if self.base.is_stopped() {
            self.base.mark_stopping();
        }
    }

    fn children(&self) -> Vec<&Child> {
        self.children.iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        self.children.iter_mut().collect()
    }

    fn set_input(&mut self, input: Option<Arc<ValueExchange>>) {
        self.base.set_input(input.clone());
        if let Some(first) = self.children.first_mut() {
            first.set_input(input);
        }
    }

    fn set_bit(&mut self, bit: u64) {
        if let Some(op) = self.children.last_mut().and_then(Child::op_mut) {
            op.set_bit(bit);
        }
    }

    fn set_output(&mut self, output: Arc<ValueExchange>, owned: bool) {
        match self.children.last_mut() {
            Some(last) => {
                last.set_output(output.clone(), owned);
                self.base.set_output(output, false);
            }
            None => self.base.set_output(output, owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scan::KeyScan;
    use crate::execution::Filter;
    use crate::expression::{constant, eq, meta_id, not};
    use crate::plan;
    use serde_json::json;

    #[test]
    fn test_chain_runs_and_closes() {
        let ctx = ExecContext::shared(PipelineConfig::default());
        let scan = KeyScan::new(
            Arc::new(plan::KeyScan {
                keys: constant(json!(["a", "b", "c"])),
                distinct: false,
            }),
            ctx.config(),
        );
        let filter = Filter::new(
            Arc::new(plan::Filter {
                condition: not(eq(meta_id(None), constant(json!("b")))),
            }),
            ctx.config(),
        );
        let mut seq = Child::new(Box::new(Sequence::new(vec![Box::new(scan), Box::new(filter)], ctx.config())));
        let output = seq.output();
        seq.start(&ctx, None);
        let mut keys = Vec::new();
        while let Some(item) = output.receive() {
            keys.push(item.document_key().unwrap_or_default().to_string());
        }
        seq.wait();
        assert_eq!(keys, vec!["a", "c"]);
        let stats = seq.stats();
        assert_eq!(stats.children.len(), 2);
        assert_eq!(stats.find("Filter").map(|s| s.out_docs), Some(2));
        seq.done();
    }
}
