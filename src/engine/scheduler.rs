//! Tick Scheduler - coalesces dirty bindings into one flush per tick.
//!
//! Mutations never reconcile directly. They mark their binding dirty here; the
//! first mark of a tick arms the scheduler, which asks the surface's
//! [`TickSource`] for a callback before the next render. When the callback
//! fires, [`TickScheduler::flush`] reconciles every dirty binding once, in the
//! order the bindings were first marked, and disarms.
//!
//! ```text
//! list.pop()   ──┐
//! list.push(1) ──┼─► mark_dirty(b1) ─► armed, tick requested
//! other.sort() ──┘   mark_dirty(b2)
//!                          ...
//! tick fires ─────────► flush: b1.reconcile(), b2.reconcile() ─► idle
//! ```
//!
//! # Lifecycle
//!
//! - Idle: no dirty bindings, no tick requested
//! - Armed: at least one dirty binding, exactly one tick requested
//!
//! A binding marked while a flush is running goes into a fresh dirty set and
//! re-arms the scheduler, so it is reconciled on the next tick. Nested
//! bindings never hit this path: they are reconciled inline by their parent.
//!
//! Torn-down bindings call [`TickScheduler::forget`]; the scheduler also only
//! holds weak references, so a binding dropped before its flush is skipped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::BindingFailure;
use crate::pipeline::TickSource;
use crate::types::BindingId;

// =============================================================================
// Flush targets
// =============================================================================

/// Something the scheduler can reconcile.
pub trait FlushTarget {
    fn binding_id(&self) -> BindingId;

    /// Reconcile against the current snapshot, recording failures (including
    /// those of nested bindings) into `outcome`.
    fn flush(&self, outcome: &mut FlushOutcome);
}

/// Result of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Bindings reconciled, nested ones included.
    pub reconciled: usize,
    pub failures: Vec<BindingFailure>,
}

impl FlushOutcome {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another outcome into this one.
    pub fn absorb(&mut self, other: FlushOutcome) {
        self.reconciled += other.reconciled;
        self.failures.extend(other.failures);
    }

    pub fn into_result(self) -> Result<usize, Vec<BindingFailure>> {
        if self.failures.is_empty() {
            Ok(self.reconciled)
        } else {
            Err(self.failures)
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct SchedulerState {
    dirty: RefCell<IndexMap<BindingId, Weak<dyn FlushTarget>>>,
    armed: Cell<bool>,
    flushing: Cell<bool>,
    next_id: Cell<u64>,
    flushes: Cell<u64>,
    ticks: Rc<dyn TickSource>,
    pending: RefCell<FlushOutcome>,
}

/// Per-surface dirty set with an explicit armed/idle lifecycle.
///
/// Cloning the handle shares the same scheduler.
#[derive(Clone)]
pub struct TickScheduler {
    state: Rc<SchedulerState>,
}

impl TickScheduler {
    pub fn new(ticks: Rc<dyn TickSource>) -> Self {
        Self {
            state: Rc::new(SchedulerState {
                dirty: RefCell::new(IndexMap::new()),
                armed: Cell::new(false),
                flushing: Cell::new(false),
                next_id: Cell::new(0),
                flushes: Cell::new(0),
                ticks,
                pending: RefCell::new(FlushOutcome::default()),
            }),
        }
    }

    /// Allocate an id for a new binding.
    pub fn allocate_id(&self) -> BindingId {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        BindingId(id)
    }

    /// Mark a binding dirty. Idempotent within a tick.
    pub fn mark_dirty(&self, id: BindingId, target: Weak<dyn FlushTarget>) {
        self.state.dirty.borrow_mut().entry(id).or_insert(target);
        self.arm();
    }

    /// Drop a binding from the dirty set (teardown).
    pub fn forget(&self, id: BindingId) {
        self.state.dirty.borrow_mut().shift_remove(&id);
    }

    pub fn is_dirty(&self, id: BindingId) -> bool {
        self.state.dirty.borrow().contains_key(&id)
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.get()
    }

    pub fn dirty_count(&self) -> usize {
        self.state.dirty.borrow().len()
    }

    /// Number of completed flushes.
    pub fn flush_count(&self) -> u64 {
        self.state.flushes.get()
    }

    fn arm(&self) {
        if self.state.armed.get() {
            return;
        }
        self.state.armed.set(true);

        let weak = Rc::downgrade(&self.state);
        self.state.ticks.schedule(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                let outcome = TickScheduler { state }.flush();
                if !outcome.failures.is_empty() {
                    warn!(failures = outcome.failures.len(), "tick flush reported failures");
                }
            }
        }));
    }

    /// Reconcile every binding dirty right now, in first-dirtied order.
    ///
    /// The outcome is returned and also kept for
    /// [`take_outcome`](Self::take_outcome), which is how tick-driven flushes
    /// report back.
    pub fn flush(&self) -> FlushOutcome {
        if self.state.flushing.get() {
            // Reentrant flush from a reconcile callback; the outer flush owns the set
            return FlushOutcome::default();
        }

        let batch = std::mem::take(&mut *self.state.dirty.borrow_mut());
        self.state.armed.set(false);
        self.state.flushing.set(true);

        debug!(bindings = batch.len(), "flush start");

        let mut outcome = FlushOutcome::default();
        for (id, target) in batch {
            let Some(target) = target.upgrade() else {
                debug!(%id, "skipping dropped binding");
                continue;
            };
            target.flush(&mut outcome);
        }

        self.state.flushing.set(false);
        self.state.flushes.set(self.state.flushes.get() + 1);

        for failure in &outcome.failures {
            warn!(binding = %failure.binding, error = %failure.error, "binding failed to reconcile");
        }
        debug!(
            reconciled = outcome.reconciled,
            failures = outcome.failures.len(),
            deferred = self.dirty_count(),
            "flush end"
        );

        self.state.pending.borrow_mut().absorb(outcome.clone());
        outcome
    }

    /// Outcomes accumulated by flushes since the last call.
    pub fn take_outcome(&self) -> FlushOutcome {
        std::mem::take(&mut *self.state.pending.borrow_mut())
    }
}

impl fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickScheduler")
            .field("dirty", &self.dirty_count())
            .field("armed", &self.is_armed())
            .field("flushes", &self.flush_count())
            .finish()
    }
}
