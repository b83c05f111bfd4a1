//! The operator trait, its run wrapper and owned-child handles
//!
//! Every operator runs on its own thread. A parent moves a child into a
//! [`Child`] handle, starts it, and gets the operator back when it joins the
//! thread. A panic inside a run is caught at the top of the thread, reported
//! on the request context and turned into a normal completion so siblings
//! waiting on the operator's output or completion signal do not hang.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::base::{ChildLink, OperatorBase};
use super::errors::ExecutionError;
use super::stats::{OperatorState, OperatorStats, StatCounters};
use super::sequence::Sequence;
use crate::context::{ExecContext, PipelineConfig};
use crate::exchange::{StopHandle, ValueExchange};
use crate::value::AnnotatedValue;

/// A node of the running plan tree.
pub trait Operator: Send {
    fn base(&self) -> &OperatorBase;

    fn base_mut(&mut self) -> &mut OperatorBase;

    /// A fresh instance sharing the plan and the outer exchanges.
    fn copy(&self) -> Box<dyn Operator>;

    /// The body of one run. The default is the consumer loop.
    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        consume(self, ctx, parent);
    }

    /// Setup before the first item. `false` aborts the run.
    fn before_items(&mut self, _ctx: &Arc<ExecContext>, _parent: Option<&AnnotatedValue>) -> bool {
        true
    }

    /// Handles one input item. `false` ends the run early.
    fn process_item(&mut self, item: AnnotatedValue, _ctx: &Arc<ExecContext>) -> bool {
        self.base_mut().send(item)
    }

    /// Flushes batches and releases run resources.
    fn after_items(&mut self, _ctx: &Arc<ExecContext>) {}

    fn children(&self) -> Vec<&Child> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        Vec::new()
    }

    fn output(&self) -> Arc<ValueExchange> {
        self.base().output().clone()
    }

    fn set_input(&mut self, input: Option<Arc<ValueExchange>>) {
        self.base_mut().set_input(input);
    }

    fn set_output(&mut self, output: Arc<ValueExchange>, owned: bool) {
        self.base_mut().set_output(output, owned);
    }

    fn set_parent_link(&mut self, link: Option<ChildLink>) {
        self.base_mut().set_parent_link(link);
    }

    /// Provenance bit stamped on every row the operator emits.
    fn set_bit(&mut self, bit: u64) {
        self.base_mut().set_bit(bit);
    }

    /// Resets the operator and its children for another run.
    fn reopen(&mut self) -> bool {
        let mut ok = self.base_mut().reopen();
        for child in self.children_mut() {
            ok &= child.reopen();
        }
        ok
    }

    /// Tears down the operator and its children. Idempotent.
    fn done(&mut self) {
        for child in self.children_mut() {
            child.done();
        }
        self.base_mut().done();
    }

    fn stats(&self) -> OperatorStats {
        let mut stats = self.base().stats();
        stats.children = self.children().iter().map(|c| c.stats()).collect();
        stats
    }
}

/// The canonical consumer loop: before_items, process_item per input item,
/// after_items. Ending early stops the input so upstream unwinds.
pub fn consume<O: Operator + ?Sized>(op: &mut O, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
    if !op.before_items(ctx, parent) {
        op.base().stop_input();
        op.after_items(ctx);
        return;
    }
    loop {
        if op.base().is_stopped() {
            op.base_mut().mark_stopping();
            op.base().stop_input();
            break;
        }
        let Some(item) = op.base_mut().receive() else {
            break;
        };
        if !op.process_item(item, ctx) {
            op.base().stop_input();
            break;
        }
    }
    op.after_items(ctx);
}

/// Runs one operator to completion on the current thread.
///
/// A second call without a reopen in between is a no-op.
pub fn run_operator(op: &mut dyn Operator, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
    if !op.base_mut().begin_run() {
        return;
    }
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| op.execute(ctx, parent)));
    if let Err(payload) = outcome {
        ctx.recover(op.base().name(), payload);
        op.base().stop_handle().stop_children();
        op.base().stop_input();
    }
    op.base_mut().end_run(ctx, started.elapsed());
}

enum Slot {
    Idle(Box<dyn Operator>),
    Running(JoinHandle<Box<dyn Operator>>),
    Lost,
}

/// Owned handle to a child operator, idle or running on its own thread.
pub struct Child {
    slot: Slot,
    name: &'static str,
    stop: StopHandle,
    output: Arc<ValueExchange>,
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Child")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Child {
    pub fn new(op: Box<dyn Operator>) -> Self {
        Self {
            name: op.base().name(),
            stop: op.base().stop_handle().clone(),
            output: op.output(),
            slot: Slot::Idle(op),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn output(&self) -> Arc<ValueExchange> {
        self.output.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running(_))
    }

    /// The operator, unless it is running.
    pub fn op(&self) -> Option<&dyn Operator> {
        match &self.slot {
            Slot::Idle(op) => Some(op.as_ref()),
            _ => None,
        }
    }

    pub fn op_mut(&mut self) -> Option<&mut (dyn Operator + 'static)> {
        match &mut self.slot {
            Slot::Idle(op) => Some(op.as_mut()),
            _ => None,
        }
    }

    /// A fresh copy of the operator. A running child cannot be copied; an
    /// empty pipeline stands in for it.
    pub fn copy_op(&self) -> Box<dyn Operator> {
        match self.op() {
            Some(op) => op.copy(),
            None => Box::new(Sequence::new(Vec::new(), &PipelineConfig::default())),
        }
    }

    pub fn set_input(&mut self, input: Option<Arc<ValueExchange>>) {
        if let Some(op) = self.op_mut() {
            op.set_input(input);
        }
    }

    pub fn set_output(&mut self, output: Arc<ValueExchange>, owned: bool) {
        if let Slot::Idle(op) = &mut self.slot {
            op.set_output(output.clone(), owned);
            self.output = output;
        }
    }

    pub fn set_parent_link(&mut self, link: Option<ChildLink>) {
        if let Some(op) = self.op_mut() {
            op.set_parent_link(link);
        }
    }

    /// Starts the child on its own thread. Returns `false` if it could not be
    /// started; its output is then closed and its completion posted.
    pub fn start(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> bool {
        let op = match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Idle(op) => op,
            other => {
                self.slot = other;
                return false;
            }
        };
        let owns_output = op.base().owns_output();
        let link = op.base().parent_link().cloned();
        let thread_ctx = Arc::clone(ctx);
        let parent = parent.cloned();
        let mut op = op;
        // the thread hands the operator back through its join handle
        let spawned = thread::Builder::new()
            .name(format!("aerodb-{}", self.name))
            .spawn(move || {
                run_operator(op.as_mut(), &thread_ctx, parent.as_ref());
                op
            });
        match spawned {
            Ok(handle) => {
                self.slot = Slot::Running(handle);
                true
            }
            Err(err) => {
                ctx.error(ExecutionError::internal(
                    self.name,
                    format!("cannot start operator thread: {err}"),
                ));
                if owns_output {
                    self.output.close();
                }
                if let Some(link) = link {
                    link.notify();
                }
                false
            }
        }
    }

    /// Runs the child to completion on the current thread.
    pub fn run_inline(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        if let Some(op) = self.op_mut() {
            run_operator(op, ctx, parent);
        }
    }

    /// Sends stop to the child's subtree.
    pub fn stop(&self) {
        self.stop.send_stop();
    }

    /// Joins the child's thread if it is running.
    pub fn wait(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Slot::Running(handle) = std::mem::replace(&mut self.slot, Slot::Lost) {
            // a join error means the panic escaped the run wrapper; the operator is gone
            if let Ok(op) = handle.join() {
                self.slot = Slot::Idle(op);
            }
        }
    }

    pub fn reopen(&mut self) -> bool {
        self.wait();
        match self.op_mut() {
            Some(op) => op.reopen(),
            None => false,
        }
    }

    pub fn done(&mut self) {
        self.wait();
        if let Some(op) = self.op_mut() {
            op.done();
        }
    }

    pub fn stats(&self) -> OperatorStats {
        match &self.slot {
            Slot::Idle(op) => op.stats(),
            Slot::Running(_) => {
                OperatorStats::from_counters(self.name, "", OperatorState::Running, &StatCounters::default())
            }
            Slot::Lost => OperatorStats::from_counters(self.name, "", OperatorState::Done, &StatCounters::default()),
        }
    }
}
