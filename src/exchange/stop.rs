//! Top-down stop propagation
//!
//! Every operator owns a [`StopNode`]. Sending stop to a node stops the
//! operator's output exchange, any connection it attached for the current run
//! (index scans, private fan-in exchanges) and then recurses into the nodes of
//! the operator's owned children. Shared exchanges are never followed, so a
//! stop reaches each operator once regardless of fan-in or fan-out.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Anything that can be told to stop.
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

/// Shared reference to an operator's stop node.
pub type StopHandle = Arc<StopNode>;

/// Stop fan-out point for one operator instance.
#[derive(Default)]
pub struct StopNode {
    requested: AtomicBool,
    next_token: AtomicU64,
    output: Mutex<Option<Arc<dyn Stoppable>>>,
    attached: Mutex<Vec<(u64, Arc<dyn Stoppable>)>>,
    children: Mutex<Vec<StopHandle>>,
}

impl fmt::Debug for StopNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopNode")
            .field("requested", &self.is_requested())
            .field("attached", &self.attached.lock().len())
            .field("children", &self.children.lock().len())
            .finish()
    }
}

impl StopNode {
    pub fn new() -> StopHandle {
        Arc::new(Self::default())
    }

    /// Whether stop has been sent to this node since the last reset.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Replaces the output target stopped by this node.
    pub fn set_output(&self, target: Arc<dyn Stoppable>) {
        *self.output.lock() = Some(target);
    }

    /// Attaches a run-scoped target. If stop was already sent, the target is
    /// stopped immediately. Returns a token for [`StopNode::detach`].
    pub fn attach(&self, target: Arc<dyn Stoppable>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.attached.lock().push((token, Arc::clone(&target)));
        if self.is_requested() {
            target.stop();
        }
        token
    }

    pub fn detach(&self, token: u64) {
        self.attached.lock().retain(|(t, _)| *t != token);
    }

    pub fn add_child(&self, child: StopHandle) {
        self.children.lock().push(child);
    }

    pub fn clear_children(&self) {
        self.children.lock().clear();
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Delivers stop once. Returns `false` if stop had already been delivered.
    pub fn send_stop(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        let output = self.output.lock().clone();
        if let Some(output) = output {
            output.stop();
        }
        let attached: Vec<_> = self.attached.lock().iter().map(|(_, t)| Arc::clone(t)).collect();
        for target in attached {
            target.stop();
        }
        let children: Vec<_> = self.children.lock().clone();
        for child in children {
            child.send_stop();
        }
        true
    }

    /// Stops attached targets and owned children without touching the output.
    /// Used when an operator dies and must release its subtree.
    pub fn stop_children(&self) {
        let attached: Vec<_> = self.attached.lock().iter().map(|(_, t)| Arc::clone(t)).collect();
        for target in attached {
            target.stop();
        }
        let children: Vec<_> = self.children.lock().clone();
        for child in children {
            child.send_stop();
        }
    }

    /// Clears the delivered flag so the operator can be re-driven.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::Release);
        self.attached.lock().clear();
    }
}
