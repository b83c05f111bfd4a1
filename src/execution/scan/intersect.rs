//! Intersect and ordered intersect scans
//!
//! Every child scan stamps its provenance bit on the rows it emits. A
//! document key is part of the result once the bits accumulated for it cover
//! every child.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::union::{check_fanout, child_bit};
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::exchange::{Exchange, Received, ValueExchange};
use crate::execution::base::{ChildLink, OperatorBase};
use crate::execution::errors::ExecutionError;
use crate::execution::eval::evaluate_count;
use crate::execution::operator::{Child, Operator};
use crate::plan;
use crate::value::AnnotatedValue;

/// A key seen by some children but not yet all of them.
#[derive(Debug)]
struct Pending {
    bits: u64,
    item: Option<AnnotatedValue>,
    size: usize,
}

/// Children, their shared exchange and the per-run bookkeeping both
/// intersect flavours use.
struct Fanin {
    children: Vec<Child>,
    inbox: Arc<ValueExchange>,
    full_mask: u64,
    pending: FxHashMap<String, Pending>,
    emitted: FxHashSet<String>,
    tracked: usize,
}

impl Fanin {
    fn new(children: Vec<Box<dyn Operator>>, capacity: usize, base: &OperatorBase) -> Self {
        let inbox: Arc<ValueExchange> = Arc::new(Exchange::new(capacity));
        let mut full_mask = 0;
        let children = children
            .into_iter()
            .enumerate()
            .map(|(i, mut op)| {
                full_mask |= child_bit(i);
                op.set_bit(child_bit(i));
                op.set_output(inbox.clone(), false);
                op.set_parent_link(Some(ChildLink::new(inbox.clone(), i)));
                let child = Child::new(op);
                base.adopt(&child);
                child
            })
            .collect();
        Self {
            children,
            inbox,
            full_mask,
            pending: FxHashMap::default(),
            emitted: FxHashSet::default(),
            tracked: 0,
        }
    }

    fn copy(&self, base: &OperatorBase) -> Self {
        let copies = self.children.iter().map(Child::copy_op).collect();
        Self::new(copies, self.inbox.capacity(), base)
    }

    /// Records `item`'s bits under its key, keeping the first copy of the row.
    /// Returns the accumulated bits.
    fn record(&mut self, key: &str, item: AnnotatedValue, ctx: &ExecContext) -> Result<u64, ExecutionError> {
        let bits = item.bits();
        if let Some(entry) = self.pending.get_mut(key) {
            entry.bits |= bits;
            if entry.item.is_none() {
                let size = item.size();
                ctx.track_memory(size)?;
                self.tracked += size;
                entry.size = size;
                entry.item = Some(item);
            } else {
                item.recycle();
            }
            return Ok(entry.bits);
        }
        let size = item.size();
        ctx.track_memory(size)?;
        self.tracked += size;
        self.pending.insert(
            key.to_string(),
            Pending {
                bits,
                item: Some(item),
                size,
            },
        );
        Ok(bits)
    }

    /// Notes a key's bits without keeping the row.
    fn note(&mut self, key: &str, bits: u64) -> u64 {
        let entry = self.pending.entry(key.to_string()).or_insert(Pending {
            bits: 0,
            item: None,
            size: 0,
        });
        entry.bits |= bits;
        entry.bits
    }

    fn take(&mut self, key: &str, ctx: &ExecContext) -> Option<AnnotatedValue> {
        let entry = self.pending.remove(key)?;
        ctx.release_memory(entry.size);
        self.tracked -= entry.size;
        entry.item
    }

    fn start(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) -> usize {
        let mut started = 0;
        for child in &mut self.children {
            if child.start(ctx, parent) {
                started += 1;
            }
        }
        started
    }

    fn stop_and_wait(&mut self, early: bool) {
        if early {
            for child in &self.children {
                child.stop();
            }
        }
        for child in &mut self.children {
            child.wait();
        }
    }

    /// Sends a completed row once, stamped with every child's bit.
    /// Returns `false` if downstream stopped.
    fn emit(&mut self, key: &str, base: &mut OperatorBase, ctx: &ExecContext) -> bool {
        self.emitted.insert(key.to_string());
        match self.take(key, ctx) {
            Some(mut row) => {
                row.set_bits(self.full_mask);
                base.send(row)
            }
            None => true,
        }
    }

    fn already_emitted(&self, key: &str) -> bool {
        self.emitted.contains(key)
    }

    /// Drops every pending row and releases its quota.
    fn clear(&mut self, ctx: &ExecContext) {
        ctx.release_memory(self.tracked);
        self.tracked = 0;
        self.pending = FxHashMap::default();
        self.emitted = FxHashSet::default();
    }

    fn attach(&self, base: &OperatorBase) -> u64 {
        base.stop_handle().attach(self.inbox.clone())
    }
}

fn evaluate_limit(
    base: &OperatorBase,
    plan: &plan::IntersectScan,
    parent: Option<&AnnotatedValue>,
    ctx: &ExecContext,
) -> Option<Option<u64>> {
    match evaluate_count(base.name(), plan.limit.as_ref(), parent, ctx) {
        Ok(limit) => Some(limit),
        Err(err) => {
            ctx.error(err);
            None
        }
    }
}

fn item_key(base: &OperatorBase, item: &AnnotatedValue, ctx: &ExecContext) -> Option<String> {
    let key = item.document_key().map(str::to_string);
    if key.is_none() {
        ctx.error(ExecutionError::internal(base.name(), "row carries no document key"));
    }
    key
}

/// Emits a document key as soon as every child has produced it. A child that
/// completes without producing anything empties the result.
pub struct IntersectScan {
    base: OperatorBase,
    plan: Arc<plan::IntersectScan>,
    fanin: Fanin,
}

impl IntersectScan {
    pub fn new(children: Vec<Box<dyn Operator>>, plan: Arc<plan::IntersectScan>, config: &PipelineConfig) -> Self {
        let base = OperatorBase::new("IntersectScan", Phase::SetScan, config);
        let fanin = Fanin::new(children, config.pipeline_capacity, &base);
        Self { base, plan, fanin }
    }
}

impl std::fmt::Debug for IntersectScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntersectScan")
            .field("children", &self.fanin.children)
            .finish()
    }
}

impl Operator for IntersectScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let fanin = self.fanin.copy(&base);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            fanin,
        })
    }

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        if let Err(err) = check_fanout(self.base.name(), self.fanin.children.len()) {
            ctx.error(err);
            return;
        }
        let Some(limit) = evaluate_limit(&self.base, &self.plan, parent, ctx) else {
            return;
        };
        if limit == Some(0) {
            return;
        }
        let token = self.fanin.attach(&self.base);
        let mut produced = vec![0u64; self.fanin.children.len()];
        let mut running = self.fanin.start(ctx, parent);
        let mut emitted = 0u64;
        let mut early = false;
        while running > 0 && !early {
            match self.fanin.inbox.receive_or_child() {
                Received::Item(item) => {
                    self.base.add_in_docs(1);
                    for (i, count) in produced.iter_mut().enumerate() {
                        if item.bits() & child_bit(i) != 0 {
                            *count += 1;
                        }
                    }
                    let Some(key) = item_key(&self.base, &item, ctx) else {
                        early = true;
                        continue;
                    };
                    if self.fanin.already_emitted(&key) {
                        item.recycle();
                        continue;
                    }
                    match self.fanin.record(&key, item, ctx) {
                        Ok(bits) if bits & self.fanin.full_mask == self.fanin.full_mask => {
                            if !self.fanin.emit(&key, &mut self.base, ctx) {
                                early = true;
                            }
                            emitted += 1;
                            if limit.is_some_and(|l| emitted >= l) {
                                early = true;
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            ctx.error(err);
                            early = true;
                        }
                    }
                }
                Received::Child(i) => {
                    running -= 1;
                    if produced.get(i).copied() == Some(0) {
                        early = true;
                    }
                }
                Received::Closed | Received::Stopped => early = true,
            }
        }
        self.fanin.stop_and_wait(early);
        self.fanin.clear(ctx);
        self.base.stop_handle().detach(token);
    }

    fn children(&self) -> Vec<&Child> {
        self.fanin.children.iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        self.fanin.children.iter_mut().collect()
    }

    fn reopen(&mut self) -> bool {
        self.fanin.inbox.reset();
        let mut ok = self.base.reopen();
        for child in &mut self.fanin.children {
            ok &= child.reopen();
        }
        ok
    }

    fn done(&mut self) {
        for child in &mut self.fanin.children {
            child.done();
        }
        self.fanin.inbox.dispose();
        self.base.done();
    }
}

/// Intersection of children that emit keys in the same order.
///
/// Results come out in the first child's order: keys from the first child
/// queue up, and the front of the queue is emitted once every child has
/// produced it, or dropped once a child that lacks it has run dry. The scan
/// ends as soon as the first child is exhausted and its queue drained, or the
/// limit is reached.
pub struct OrderedIntersectScan {
    base: OperatorBase,
    plan: Arc<plan::IntersectScan>,
    fanin: Fanin,
    queue: VecDeque<String>,
}

impl OrderedIntersectScan {
    pub fn new(children: Vec<Box<dyn Operator>>, plan: Arc<plan::IntersectScan>, config: &PipelineConfig) -> Self {
        let base = OperatorBase::new("OrderedIntersectScan", Phase::SetScan, config);
        let fanin = Fanin::new(children, config.pipeline_capacity, &base);
        Self {
            base,
            plan,
            fanin,
            queue: VecDeque::new(),
        }
    }

    /// Resolves queue fronts. Returns `false` if downstream stopped or the
    /// limit was reached.
    fn drain_front(&mut self, exhausted: u64, emitted: &mut u64, limit: Option<u64>, ctx: &ExecContext) -> bool {
        let full = self.fanin.full_mask;
        while let Some(front) = self.queue.front() {
            let bits = self.fanin.pending.get(front).map_or(0, |p| p.bits);
            if bits & full == full {
                let key = front.clone();
                self.queue.pop_front();
                if !self.fanin.emit(&key, &mut self.base, ctx) {
                    return false;
                }
                *emitted += 1;
                if limit.is_some_and(|l| *emitted >= l) {
                    return false;
                }
            } else if (full & !bits) & exhausted != 0 {
                let key = front.clone();
                self.queue.pop_front();
                if let Some(row) = self.fanin.take(&key, ctx) {
                    row.recycle();
                }
            } else {
                break;
            }
        }
        true
    }
}

impl std::fmt::Debug for OrderedIntersectScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedIntersectScan")
            .field("children", &self.fanin.children)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Operator for OrderedIntersectScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        let base = self.base.copy();
        let fanin = self.fanin.copy(&base);
        Box::new(Self {
            base,
            plan: Arc::clone(&self.plan),
            fanin,
            queue: VecDeque::new(),
        })
    }

    fn execute(&mut self, ctx: &Arc<ExecContext>, parent: Option<&AnnotatedValue>) {
        if let Err(err) = check_fanout(self.base.name(), self.fanin.children.len()) {
            ctx.error(err);
            return;
        }
        let Some(limit) = evaluate_limit(&self.base, &self.plan, parent, ctx) else {
            return;
        };
        if limit == Some(0) {
            return;
        }
        let first = child_bit(0);
        let token = self.fanin.attach(&self.base);
        let mut running = self.fanin.start(ctx, parent);
        let mut exhausted = 0u64;
        let mut emitted = 0u64;
        let mut early = false;
        while running > 0 && !early {
            match self.fanin.inbox.receive_or_child() {
                Received::Item(item) => {
                    self.base.add_in_docs(1);
                    let Some(key) = item_key(&self.base, &item, ctx) else {
                        early = true;
                        continue;
                    };
                    if self.fanin.already_emitted(&key) {
                        item.recycle();
                        continue;
                    }
                    if item.bits() & first != 0 {
                        let queued = self.fanin.pending.get(&key).is_some_and(|p| p.item.is_some());
                        if let Err(err) = self.fanin.record(&key, item, ctx) {
                            ctx.error(err);
                            early = true;
                            continue;
                        }
                        if !queued {
                            self.queue.push_back(key);
                        }
                    } else {
                        self.fanin.note(&key, item.bits());
                        item.recycle();
                    }
                    early = !self.drain_front(exhausted, &mut emitted, limit, ctx);
                }
                Received::Child(i) => {
                    running -= 1;
                    exhausted |= child_bit(i);
                    early = !self.drain_front(exhausted, &mut emitted, limit, ctx);
                    if exhausted & first != 0 && self.queue.is_empty() {
                        early = true;
                    }
                }
                Received::Closed | Received::Stopped => early = true,
            }
        }
        self.fanin.stop_and_wait(early || running > 0);
        self.queue.clear();
        self.fanin.clear(ctx);
        self.base.stop_handle().detach(token);
    }

    fn children(&self) -> Vec<&Child> {
        self.fanin.children.iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut Child> {
        self.fanin.children.iter_mut().collect()
    }

    fn reopen(&mut self) -> bool {
        self.fanin.inbox.reset();
        self.queue.clear();
        let mut ok = self.base.reopen();
        for child in &mut self.fanin.children {
            ok &= child.reopen();
        }
        ok
    }

    fn done(&mut self) {
        for child in &mut self.fanin.children {
            child.done();
        }
        self.queue = VecDeque::new();
        self.fanin.inbox.dispose();
        self.base.done();
    }
}
