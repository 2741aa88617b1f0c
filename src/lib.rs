//! # spark-foreach
//!
//! List reconciliation and locals scoping for repeating template directives.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! host property reactivity.
//!
//! ## Architecture
//!
//! A repeat site (`repeat("item: items")`) is bound to an
//! [`ObservableCollection`]. Every mutation of the collection, and every
//! reassignment of a host property the source expression reads, marks the
//! binding dirty. Once per tick the scheduler reconciles each dirty binding:
//!
//! ```text
//! list.push(..) ─► mark_dirty ─► tick ─► reconcile ─┬─ grow / shrink / move instances
//!                                                   ├─ rebuild changed locals frames
//!                                                   └─ reconcile nested bindings inline
//! ```
//!
//! Each instance sees its element plus `index`, `number`, `length`, `first`,
//! `last`, `odd`, `even` and `key` through a [`LocalsFrame`] chained to the
//! enclosing scope, referenced as `@name` from bindings.
//!
//! ## Modules
//!
//! - [`types`] - Core types (Value, ids, LocalChanges)
//! - [`engine`] - Locals frames, observable collections, tick scheduler
//! - [`expression`] - Binding expressions, directives, evaluation
//! - [`renderer`] - Node tree and templates
//! - [`primitives`] - Collection bindings and reconciliation
//! - [`pipeline`] - Mounting and tick delivery

pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod pipeline;
pub mod primitives;
pub mod renderer;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use config::{EngineConfig, DEFAULT_LOCAL};

pub use engine::{
    CollectionSubscription, FlushOutcome, FlushTarget, Locals, LocalsFrame, ObservableCollection,
    TickScheduler,
};

pub use error::{
    BindingError, BindingFailure, EvaluationError, MountError, ParseError, ReconcileError,
};

pub use expression::{Directive, Evaluator, Expression, HostEvaluator, HostProperties};

pub use pipeline::{mount, Component, ManualTicks, Surface, TickSource};

pub use primitives::{CollectionBinding, InstanceTree, ItemLocals, ReconcileStats};

pub use renderer::{element, repeat, text, NodeTree, TemplateNode, TemplateRegistry};
