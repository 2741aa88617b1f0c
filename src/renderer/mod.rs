//! Renderer - the rendered node tree and the templates cloned into it.
//!
//! - [`NodeTree`]: arena of rendered nodes with attach/detach/move
//! - [`TemplateRegistry`]: compiled templates, instantiated into [`Fragment`]s

mod template;
mod tree;

pub use template::*;
pub use tree::*;
