//! Union and distinct scans

use std::sync::Arc;

use super::keyset::{Admit, KeySet};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, Received, ValueExchange};
use crate::execution::base::{ChildLink, OperatorBase};
use crate::execution::errors::ExecutionError;
use crate::execution::eval::evaluate_count;
use crate::execution::operator::{Child, Operator};
use crate::plan;
use crate::value::AnnotatedValue;

/// Most children a set scan can track, one provenance bit each.
pub const MAX_SET_CHILDREN: usize = 64;

/// Provenance bit of the child at `index`; zero past [`MAX_SET_CHILDREN`].
pub(crate) fn child_bit(index: usize) -> u64 {
    u32::try_from(index).ok().and_then(|i| 1u64.checked_shl(i)).unwrap_or(0)
}

/// Rejects a fan-out wider than the provenance bits can tell apart.
pub(crate) fn check_fanout(name: &str, children: usize) -> Result<(), ExecutionError> {
    if children > MAX_SET_CHILDREN {
        return Err(ExecutionError::internal(
            name,
            format!("set scan has {children} children, at most {MAX_SET_CHILDREN} are supported"),
        ));
    }
    Ok(())
}

fn evaluate_window(
    name: &str,
    plan: &plan::SetScan,
    parent: Option<&AnnotatedValue>,
    ctx: &ExecContext,
) -> Result<(Option<u64>, Option<u64>), ExecutionError> {
    let offset = evaluate_count(name, plan.offset.as_ref(), parent, ctx)?;
    let limit = evaluate_count(name, plan.limit.as_ref(), parent, ctx)?;
    Ok((offset, limit))
}

/// Runs child scans concurrently into one shared exchange and emits each
/// document key once.
pub struct UnionScan {
    base: OperatorBase,
    plan: Arc<plan::SetScan>,
    children: Vec<Child>,
    inbox: Arc<ValueExchange>,
    keys: KeySet,
}

impl UnionScan {
    pub fn new(children: Vec<Box<dyn Operator>>, plan: Arc<plan::SetScan>, config: &PipelineConfig) -> Self {
        let base = OperatorBase::new("UnionScan", Phase::SetScan, config);
        let inbox: Arc<ValueExchange> = Arc::new(Exchange::new(config.pipeline_capacity));
        let children = Self::wire(children, &inbox, &base);
        Self {
            base,
            plan,
            children,
            inbox,
            keys: KeySet::default(),
        }
    }

    fn wire(children: Vec<Box<dyn Operator>>, inbox: &Arc<ValueExchange>, base: &OperatorBase) -> Vec<Child> {
        children
            .into_iter()
            .enumerate()
            .map(|(i, mut op)| {
                op.set_bit(child_bit(i));
                op.set_output(inbox.clone(), false);
                op.set_parent_link(Some(ChildLink::new(inbox.clone(), i)));
                let child = Child::new(op);
                base.adopt(&child);
                child
            })
            .collect()
    }
}

impl std::fmt::Debug for UnionScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionScan").field("children", &self.children).finish()
    }
}

impl Operator for UnionScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let inbox: Arc<ValueExchange> = Arc::new(Exchange::new(self.inbox.capacity()));
        let copies = self.children.iter().map(Child::copy_op).collect();
        let children = Self::wire(copies, &inbox, &base);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            children,
            inbox,
            keys: KeySet::default(),
        })
    }

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        if let Err(err) = check_fanout(self.base.name(), self.children.len()) {
            ctx.error(err);
            return;
        }
        let (offset, limit) = match evaluate_window(self.base.name(), &self.plan, parent, ctx) {
            Ok(window) => window,
            Err(err) => {
                ctx.error(err);
                return;
            }
        };
        self.keys.start(offset, limit);
        let token = self.base.stop_handle().attach(self.inbox.clone());
        let mut running = 0;
        for child in &mut self.children {
            if child.start(ctx, parent) {
                running += 1;
            }
        }
        let mut early = self.keys.is_full();
        while running > 0 && !early {
            match self.inbox.receive_or_child() {
                Received::Item(item) => {
                    self.base.add_in_docs(1);
                    let Some(key) = item.document_key() else {
                        ctx.error(ExecutionError::internal(self.base.name(), "row carries no document key"));
                        early = true;
                        continue;
                    };
                    match self.keys.admit(key) {
                        Admit::Emit => {
                            if !self.base.send(item) {
                                early = true;
                            } else if self.keys.is_full() {
                                early = true;
                            }
                        }
                        Admit::Skip | Admit::Duplicate => item.recycle(),
                    }
                }
                Received::Child(_) => running -= 1,
                Received::Closed | Received::Stopped => early = true,
            }
        }
        if early {
            for child in &self.children {
                child.stop();
            }
        }
        for child in &mut self.children {
            child.wait();
        }
        self.base.stop_handle().detach(token);
    }

    fn children(&self) -> Vec<&Child> {
        self.children.iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        self.children.iter_mut().collect()
    }

    fn reopen(&mut self) -> bool {
        self.inbox.reset();
        self.keys.clear();
        let mut ok = self.base.reopen();
        for child in &mut self.children {
            ok &= child.reopen();
        }
        ok
    }

    fn done(&mut self) {
        for child in &mut self.children {
            child.done();
        }
        self.keys.clear();
        self.inbox.dispose();
        self.base.done();
    }
}

/// Deduplicates a single child scan by document key.
pub struct DistinctScan {
    base: OperatorBase,
    plan: Arc<plan::SetScan>,
    child: Child,
    keys: KeySet,
}

impl DistinctScan {
    pub fn new(child: Box<dyn Operator>, plan: Arc<plan::SetScan>, config: &PipelineConfig) -> Self {
        let mut base = OperatorBase::new("DistinctScan", Phase::SetScan, config);
        let child = Child::new(child);
        base.set_input(Some(child.output()));
        base.adopt(&child);
        Self {
            base,
            plan,
            child,
            keys: KeySet::default(),
        }
    }
}

impl std::fmt::Debug for DistinctScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistinctScan").field("child", &self.child).finish()
    }
}

impl Operator for DistinctScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let mut base = self.base.copy();
        let mut child = Child::new(self.child.copy_op());
        child.set_output(Arc::new(Exchange::new(self.child.output().capacity())), true);
        base.set_input(Some(child.output()));
        base.adopt(&child);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            child,
            keys: KeySet::default(),
        })
    }

    fn before_items(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        match evaluate_window(self.base.name(), &self.plan, parent, ctx) {
            Ok((offset, limit)) => self.keys.start(offset, limit),
            Err(err) => {
                ctx.error(err);
                return false;
            }
        }
        if self.keys.is_full() {
            return false;
        }
        self.child.start(ctx, parent)
    }

    fn process_item(&mut self, item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let Some(key) = item.document_key() else {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no document key"));
            return false;
        };
        match self.keys.admit(key) {
            Admit::Emit => self.base.send(item) && !self.keys.is_full(),
            Admit::Skip | Admit::Duplicate => {
                item.recycle();
                true
            }
        }
    }

    fn after_items(&mut self, _ctx: &Arc<ExecContext>) {
        if self.child.is_running() {
            self.child.stop();
        }
        self.child.wait();
    }

    fn children(&self) -> Vec<&Child> {
        vec![&self.child]
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        vec![&mut self.child]
    }

    fn reopen(&mut self) -> bool {
        self.keys.clear();
        self.base.reopen() && self.child.reopen()
    }

    fn done(&mut self) {
        self.child.done();
        self.keys.clear();
        self.base.done();
    }
}
