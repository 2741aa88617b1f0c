//! Engine - scopes, observable collections and the tick scheduler.
//!
//! The engine holds the state every repeating directive depends on:
//! - [`LocalsFrame`]: chained name → value scopes for instance locals
//! - [`ObservableCollection`]: lists that report each mutation exactly once
//! - [`TickScheduler`]: the per-surface dirty set flushed once per tick
//!
//! # Data Flow
//!
//! ```text
//! list.shift() → subscription → scheduler.mark_dirty(binding)
//!                                      │ (tick)
//!                                      ▼
//!                               flush → binding.reconcile() → frames rebuilt
//! ```

mod collection;
mod locals;
mod scheduler;

pub use collection::*;
pub use locals::*;
pub use scheduler::*;
