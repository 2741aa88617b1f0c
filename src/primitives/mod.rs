//! Primitives - the repeating directive.
//!
//! - [`CollectionBinding`]: one repeat site bound to its source list
//! - [`InstanceTree`]: the instances a binding owns
//! - [`ItemLocals`], [`plan_keyed`]: keys, keyed move plans, derived locals
//!
//! # Ownership
//!
//! ```text
//! Surface ─► CollectionBinding ─► InstanceTree ─► ItemInstance ─► CollectionBinding (nested)
//! ```
//!
//! Each arrow is exclusive ownership. Tearing down a binding destroys its
//! instances, which tear down their nested bindings first.

mod foreach;
mod instance;
mod reconcile;

pub use foreach::*;
pub use instance::*;
pub use reconcile::*;
