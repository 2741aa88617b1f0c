//! Pipeline - mounting and tick delivery.
//!
//! ```text
//! mount(component) ─► initial render ─► Surface
//!                                          │ mutation / reassignment
//!                                          ▼
//!                         scheduler armed ─► ManualTicks::advance ─► flush
//! ```

mod mount;
mod ticks;

pub use mount::{mount, Component, Surface, VALUE_ATTR};
pub use ticks::{ManualTicks, TickCallback, TickSource};
