//! Core types shared across the engine.
//!
//! - [`Value`] - the dynamic value flowing through expressions, locals and collections
//! - [`BindingId`], [`NodeId`], [`TemplateId`] - typed indices
//! - [`LocalChanges`] - which derived locals changed for an instance

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::engine::ObservableCollection;

// =============================================================================
// Ids
// =============================================================================

/// Identity of one repeating-directive occurrence.
///
/// Allocated by the [`TickScheduler`](crate::engine::TickScheduler) of the
/// surface the binding lives on. Never reused within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Index of a node in the [`NodeTree`](crate::renderer::NodeTree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a compiled template in the [`TemplateRegistry`](crate::renderer::TemplateRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub usize);

// =============================================================================
// Value
// =============================================================================

/// A dynamic value.
///
/// Lists are shared, observable handles: cloning a `Value::List` aliases the
/// same collection and equality compares handle identity, so reassigning a
/// property to a new list is always a change while mutating the list in place
/// is not. Records are immutable and compare structurally.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    List(ObservableCollection),
    Record(Rc<IndexMap<String, Value>>),
}

impl Value {
    /// Build a list value from anything convertible to values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(ObservableCollection::new(items.into_iter().map(Into::into).collect()))
    }

    /// Build a record value from `(field, value)` pairs.
    pub fn record<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Record(Rc::new(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservableCollection> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Record(_) => 5,
        }
    }

    /// Total order used by [`ObservableCollection::sort`].
    ///
    /// Values of different types order by type rank
    /// (`null < bool < int < string < list < record`). Lists and records
    /// compare element-wise.
    pub fn natural_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) {
                    return Ordering::Equal;
                }
                let left = a.snapshot();
                let right = b.snapshot();
                cmp_slices(&left, &right)
            }
            (Value::Record(a), Value::Record(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.natural_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn cmp_slices(left: &[Value], right: &[Value]) -> Ordering {
    for (a, b) in left.iter().zip(right.iter()) {
        let ord = a.natural_cmp(b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(list) => f.debug_list().entries(list.snapshot().iter()).finish(),
            Value::Record(fields) => f.debug_map().entries(fields.iter()).finish(),
        }
    }
}

/// Text form used by text bindings.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::List(list) => {
                for (i, item) in list.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Record(_) => f.write_str("[record]"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<ObservableCollection> for Value {
    fn from(value: ObservableCollection) -> Self {
        Value::List(value)
    }
}

// =============================================================================
// Local change flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Derived locals that changed for one instance between two passes.
    ///
    /// An empty set means the instance keeps its existing frame object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LocalChanges: u16 {
        const NONE = 0;
        const ITEM = 1 << 0;
        const INDEX = 1 << 1;
        const NUMBER = 1 << 2;
        const LENGTH = 1 << 3;
        const FIRST = 1 << 4;
        const LAST = 1 << 5;
        const ODD = 1 << 6;
        const EVEN = 1 << 7;
        const KEY = 1 << 8;
        /// The enclosing frame was replaced.
        const SCOPE = 1 << 9;
        /// Instance created this pass.
        const CREATED = 1 << 10;
    }
}

// =============================================================================
// Tests
// =============================================================================
