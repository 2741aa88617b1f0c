//! Tick delivery - the "run once before next render" primitive.
//!
//! The scheduler never decides when a render happens. It asks a
//! [`TickSource`] for a callback and the host fires it. [`ManualTicks`] is a
//! deterministic source driven by the host loop (or a test) calling
//! [`ManualTicks::advance`], the equivalent of an animation frame firing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

/// Callback queued for the next tick.
pub type TickCallback = Box<dyn FnOnce()>;

/// Delivers callbacks once before the next render.
pub trait TickSource {
    fn schedule(&self, callback: TickCallback);
}

/// A tick source fired explicitly by its owner.
#[derive(Default)]
pub struct ManualTicks {
    queue: RefCell<VecDeque<TickCallback>>,
    frame: RefCell<u64>,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Number of ticks fired so far.
    pub fn frame(&self) -> u64 {
        *self.frame.borrow()
    }

    /// Fire one tick: run every callback queued before this call.
    ///
    /// Callbacks scheduled while the tick runs wait for the next one.
    /// Returns the number of callbacks run.
    pub fn advance(&self) -> usize {
        let due: Vec<TickCallback> = self.queue.borrow_mut().drain(..).collect();
        *self.frame.borrow_mut() += 1;
        trace!(frame = self.frame(), callbacks = due.len(), "tick");

        let count = due.len();
        for callback in due {
            callback();
        }
        count
    }

    /// Fire ticks until nothing is queued, at most `limit` times.
    pub fn run_until_idle(&self, limit: usize) -> usize {
        let mut fired = 0;
        while self.pending() > 0 && fired < limit {
            self.advance();
            fired += 1;
        }
        fired
    }
}

impl TickSource for ManualTicks {
    fn schedule(&self, callback: TickCallback) {
        self.queue.borrow_mut().push_back(callback);
    }
}

impl fmt::Debug for ManualTicks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTicks")
            .field("pending", &self.pending())
            .field("frame", &self.frame())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_advance_runs_queued_callbacks() {
        let ticks = ManualTicks::new();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            ticks.schedule(Box::new(move || hits.set(hits.get() + 1)));
        }

        assert_eq!(ticks.advance(), 3);
        assert_eq!(hits.get(), 3);
        assert_eq!(ticks.pending(), 0);
        assert_eq!(ticks.frame(), 1);
    }

    #[test]
    fn test_callbacks_scheduled_during_tick_wait() {
        let ticks = Rc::new(ManualTicks::new());
        let hits = Rc::new(Cell::new(0));

        let ticks_clone = ticks.clone();
        let hits_clone = hits.clone();
        ticks.schedule(Box::new(move || {
            let hits = hits_clone.clone();
            ticks_clone.schedule(Box::new(move || hits.set(hits.get() + 1)));
        }));

        ticks.advance();
        assert_eq!(hits.get(), 0);
        assert_eq!(ticks.pending(), 1);

        assert_eq!(ticks.run_until_idle(10), 1);
        assert_eq!(hits.get(), 1);
    }
}
