//! State shared by every operator

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::batch::BatchSizer;
use super::operator::Child;
use super::stats::{OperatorState, OperatorStats, StatCounters};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, StopHandle, StopNode, ValueExchange};
use crate::value::AnnotatedValue;

/// Where an operator posts its completion: an exchange's child side-channel
/// and the index it is known by there.
#[derive(Debug, Clone)]
pub struct ChildLink {
    exchange: Arc<ValueExchange>,
    index: usize,
}

impl ChildLink {
    pub fn new(exchange: Arc<ValueExchange>, index: usize) -> Self {
        Self { exchange, index }
    }

    pub fn notify(&self) -> bool {
        self.exchange.notify_child(self.index)
    }
}

/// Lifecycle state, exchanges, batch buffer and counters of one operator.
#[derive(Debug)]
pub struct OperatorBase {
    name: &'static str,
    phase: Phase,
    state: OperatorState,
    input: Option<Arc<ValueExchange>>,
    output: Arc<ValueExchange>,
    owns_output: bool,
    parent_link: Option<ChildLink>,
    stop: StopHandle,
    counters: StatCounters,
    run_out_docs: u64,
    batch: Vec<AnnotatedValue>,
    sizer: BatchSizer,
    bit: u64,
}

impl OperatorBase {
    /// A base with a fresh owned output exchange of the pipeline capacity.
    pub fn new(name: &'static str, phase: Phase, config: &PipelineConfig) -> Self {
        Self::with_output(
            name,
            phase,
            Arc::new(Exchange::new(config.pipeline_capacity)),
            true,
            config,
        )
    }

    pub fn with_output(
        name: &'static str,
        phase: Phase,
        output: Arc<ValueExchange>,
        owns_output: bool,
        config: &PipelineConfig,
    ) -> Self {
        let stop = StopNode::new();
        stop.set_output(output.clone());
        Self {
            name,
            phase,
            state: OperatorState::Dormant,
            input: None,
            output,
            owns_output,
            parent_link: None,
            stop,
            counters: StatCounters::default(),
            run_out_docs: 0,
            batch: Vec::new(),
            sizer: BatchSizer::new(config),
            bit: 0,
        }
    }

    /// Fresh mutable state around the same exchanges.
    ///
    /// The copy has its own stop node and no parent link; owned children must
    /// be adopted again by the copying operator.
    pub fn copy(&self) -> Self {
        let stop = StopNode::new();
        stop.set_output(self.output.clone());
        Self {
            name: self.name,
            phase: self.phase,
            state: OperatorState::Dormant,
            input: self.input.clone(),
            output: self.output.clone(),
            owns_output: self.owns_output,
            parent_link: None,
            stop,
            counters: StatCounters::default(),
            run_out_docs: 0,
            batch: Vec::new(),
            sizer: {
                let mut sizer = self.sizer.clone();
                sizer.reset();
                sizer
            },
            bit: self.bit,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    pub fn input(&self) -> Option<&Arc<ValueExchange>> {
        self.input.as_ref()
    }

    pub fn output(&self) -> &Arc<ValueExchange> {
        &self.output
    }

    pub fn owns_output(&self) -> bool {
        self.owns_output
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Set-scan provenance bit stamped on emitted rows.
    pub fn bit(&self) -> u64 {
        self.bit
    }

    pub fn set_bit(&mut self, bit: u64) {
        self.bit = bit;
    }

    pub fn set_input(&mut self, input: Option<Arc<ValueExchange>>) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Arc<ValueExchange>, owned: bool) {
        self.stop.set_output(output.clone());
        self.output = output;
        self.owns_output = owned;
    }

    pub fn parent_link(&self) -> Option<&ChildLink> {
        self.parent_link.as_ref()
    }

    pub fn set_parent_link(&mut self, link: Option<ChildLink>) {
        self.parent_link = link;
    }

    /// Registers a child for stop propagation.
    pub fn adopt(&self, child: &Child) {
        self.stop.add_child(child.stop_handle().clone());
    }

    /// Whether stop reached this operator or its output.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_requested() || self.output.is_stopped()
    }

    pub fn counters(&self) -> &StatCounters {
        &self.counters
    }

    /// Takes the next input item, or `None` at end of input or on stop.
    pub fn receive(&mut self) -> Option<AnnotatedValue> {
        let input = self.input.as_ref()?;
        let parked = Instant::now();
        let item = input.receive();
        self.counters.kernel += parked.elapsed();
        if item.is_some() {
            self.counters.in_docs += 1;
        }
        item
    }

    /// Counts an item consumed from a source other than the input exchange.
    pub fn add_in_docs(&mut self, n: u64) {
        self.counters.in_docs += n;
    }

    /// Sends an item downstream. `false` means downstream stopped.
    #[must_use]
    pub fn send(&mut self, mut item: AnnotatedValue) -> bool {
        if self.bit != 0 {
            item.add_bits(self.bit);
        }
        if self.output.send(item) {
            self.counters.out_docs += 1;
            true
        } else {
            self.state = OperatorState::Stopping;
            false
        }
    }

    /// Stops the input exchange so producers upstream unwind.
    pub fn stop_input(&self) {
        if let Some(input) = &self.input {
            input.stop();
        }
    }

    /// Marks the operator as unwinding because stop was observed.
    pub fn mark_stopping(&mut self) {
        if self.state == OperatorState::Running {
            self.state = OperatorState::Stopping;
        }
    }

    /// Runs a storage or index call, charging its time as service time.
    pub fn time_service<T>(&mut self, call: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = call();
        self.counters.service += started.elapsed();
        out
    }

    pub fn add_service_time(&mut self, elapsed: Duration) {
        self.counters.service += elapsed;
    }

    // Batching

    /// Next batch size, adapted to how full the output exchange is.
    pub fn batch_target(&mut self) -> usize {
        let queued = self.output.len();
        let capacity = self.output.capacity();
        self.sizer.adapt(queued, capacity)
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn batch_is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Appends to the batch, checking a buffer out of the request pool first.
    pub fn batch_push(&mut self, ctx: &ExecContext, item: AnnotatedValue) {
        if self.batch.capacity() == 0 {
            self.batch = ctx.batch_pool().checkout(self.sizer.max());
        }
        self.batch.push(item);
    }

    /// Moves the batch out; return the buffer with [`OperatorBase::release_batch`].
    pub fn take_batch(&mut self) -> Vec<AnnotatedValue> {
        mem::take(&mut self.batch)
    }

    pub fn release_batch(&mut self, ctx: &ExecContext, batch: Vec<AnnotatedValue>) {
        ctx.batch_pool().give_back(batch);
    }

    // Lifecycle

    /// Dormant to Running. Any other state means the run already happened.
    pub(crate) fn begin_run(&mut self) -> bool {
        if self.state != OperatorState::Dormant {
            return false;
        }
        self.state = OperatorState::Running;
        self.counters.runs += 1;
        self.run_out_docs = self.counters.out_docs;
        true
    }

    /// Closes an owned output, posts completion and records phase counters.
    /// Does nothing unless a run is in flight.
    pub(crate) fn end_run(&mut self, ctx: &ExecContext, elapsed: Duration) {
        if !matches!(self.state, OperatorState::Running | OperatorState::Stopping) {
            return;
        }
        self.counters.exec += elapsed;
        let phases = ctx.phases();
        phases.add_time(self.phase, elapsed);
        phases.add_count(self.phase, self.counters.out_docs - self.run_out_docs);
        phases.add_operator(self.phase);
        if self.owns_output {
            self.output.close();
        }
        if let Some(link) = &self.parent_link {
            link.notify();
        }
        self.state = OperatorState::Completed;
    }

    /// Back to Dormant for another run. Fails once Done.
    pub fn reopen(&mut self) -> bool {
        if self.state == OperatorState::Done {
            return false;
        }
        if self.owns_output {
            self.output.reset();
        }
        self.stop.reset();
        self.batch.clear();
        self.sizer.reset();
        self.state = OperatorState::Dormant;
        true
    }

    /// Terminal teardown.
    pub fn done(&mut self) {
        if self.state == OperatorState::Done {
            return;
        }
        if self.owns_output {
            self.output.dispose();
        }
        self.batch = Vec::new();
        self.parent_link = None;
        self.state = OperatorState::Done;
    }

    pub fn stats(&self) -> OperatorStats {
        OperatorStats::from_counters(self.name, self.phase.as_str(), self.state, &self.counters)
    }
}
