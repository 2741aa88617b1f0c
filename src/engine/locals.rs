//! Locals frames - chained name → value scopes.
//!
//! Every rendered instance of a repeating directive owns a frame holding its
//! element local plus the positional locals (`number`, `first`, `last`, `odd`,
//! `even`, `index`, `length`, `key`). The frame is chained to the frame of the
//! directive's host instance, or to the component root frame for top-level
//! directives:
//!
//! ```text
//! root frame            {}
//!   └── outer instance  {item: {values: [1,2,3]}, index: 0, ...}
//!         └── nested    {value: 2, index: 1, ...}
//! ```
//!
//! Lookup walks outward and the innermost definition wins, so `@index` inside
//! the nested template is the nested position while `@item` still reaches the
//! outer element.
//!
//! Frames are immutable once built. A pass that changes an instance's locals
//! builds a new frame; unchanged instances keep theirs, which lets callers
//! detect change with [`LocalsFrame::ptr_eq`].

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::BindingError;
use crate::types::Value;

/// Own bindings of one frame, in definition order.
pub type Locals = IndexMap<String, Value>;

struct FrameInner {
    bindings: Locals,
    parent: Option<LocalsFrame>,
}

/// An immutable, shareable scope frame.
#[derive(Clone)]
pub struct LocalsFrame {
    inner: Rc<FrameInner>,
}

impl LocalsFrame {
    /// An empty frame with no parent.
    pub fn root() -> Self {
        Self::with_parent(Locals::new(), None)
    }

    fn with_parent(bindings: Locals, parent: Option<LocalsFrame>) -> Self {
        Self {
            inner: Rc::new(FrameInner { bindings, parent }),
        }
    }

    /// A new frame chained to this one.
    pub fn child(&self, bindings: Locals) -> Self {
        Self::with_parent(bindings, Some(self.clone()))
    }

    /// Resolve a name through the chain.
    pub fn resolve(&self, name: &str) -> Result<Value, BindingError> {
        self.lookup(name).cloned().ok_or_else(|| BindingError {
            name: name.to_string(),
        })
    }

    /// Like [`resolve`](Self::resolve) without cloning or failing.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.inner.bindings.get(name) {
                return Some(value);
            }
            frame = frame.inner.parent.as_ref()?;
        }
    }

    /// Bindings defined directly on this frame.
    pub fn own_locals(&self) -> &Locals {
        &self.inner.bindings
    }

    pub fn parent(&self) -> Option<&LocalsFrame> {
        self.inner.parent.as_ref()
    }

    /// Number of frames above this one.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self;
        while let Some(parent) = frame.parent() {
            depth += 1;
            frame = parent;
        }
        depth
    }

    /// Whether both handles point at the same frame object.
    pub fn ptr_eq(&self, other: &LocalsFrame) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for LocalsFrame {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for LocalsFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalsFrame")
            .field("bindings", &self.inner.bindings)
            .field("depth", &self.depth())
            .finish()
    }
}
