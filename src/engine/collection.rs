//! Observable collections - sequences that report their own mutations.
//!
//! An [`ObservableCollection`] is the only way to mutate a list bound to a
//! repeating directive. Every mutating method performs the whole operation and
//! then notifies subscribers exactly once, no matter how many elements it
//! touched: `extend([1, 2, 3])` is one notification, so is `sort()`, so is
//! `set_len(0)` on a thousand-element list.
//!
//! # API
//!
//! - Append/remove: [`push`](ObservableCollection::push),
//!   [`extend`](ObservableCollection::extend), [`pop`](ObservableCollection::pop),
//!   [`shift`](ObservableCollection::shift), [`unshift`](ObservableCollection::unshift),
//!   [`splice`](ObservableCollection::splice)
//! - Reorder: [`sort`](ObservableCollection::sort), [`sort_by`](ObservableCollection::sort_by),
//!   [`reverse`](ObservableCollection::reverse)
//! - Resize/replace: [`set_len`](ObservableCollection::set_len),
//!   [`set`](ObservableCollection::set), [`replace`](ObservableCollection::replace)
//! - Observe: [`subscribe`](ObservableCollection::subscribe) returns a guard
//!   that unsubscribes on drop
//!
//! # Example
//!
//! ```
//! use spark_foreach::{ObservableCollection, Value};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let list = ObservableCollection::from_values([4, 2, 3, 1]);
//! let hits = Rc::new(Cell::new(0));
//! let hits_clone = hits.clone();
//! let _sub = list.subscribe(move || hits_clone.set(hits_clone.get() + 1));
//!
//! list.extend([Value::from(1), Value::from(2)]);
//! assert_eq!(hits.get(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::types::Value;

type Callback = Rc<dyn Fn()>;

struct CollectionInner {
    items: RefCell<Vec<Value>>,
    subscribers: RefCell<Vec<(u64, Callback)>>,
    next_subscriber: Cell<u64>,
    version: Cell<u64>,
}

/// A shared, observable sequence of values.
///
/// Cloning the handle aliases the same sequence.
#[derive(Clone)]
pub struct ObservableCollection {
    inner: Rc<CollectionInner>,
}

impl ObservableCollection {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(CollectionInner {
                items: RefCell::new(items),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(0),
                version: Cell::new(0),
            }),
        }
    }

    pub fn from_values<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(items.into_iter().map(Into::into).collect())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Borrow the contents for the duration of `f`.
    ///
    /// `f` must not mutate this collection.
    pub fn with<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    /// Number of notifications raised so far.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Whether both handles alias the same collection.
    pub fn ptr_eq(&self, other: &ObservableCollection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Mutations (one notification each)
    // =========================================================================

    pub fn push(&self, value: impl Into<Value>) {
        self.mutate(|items| items.push(value.into()));
    }

    /// Append several values as one operation.
    pub fn extend<I: IntoIterator<Item = Value>>(&self, values: I) {
        self.mutate(|items| items.extend(values));
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate(|items| items.pop())
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        self.mutate(|items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }

    /// Insert one value at the front.
    pub fn unshift(&self, value: impl Into<Value>) {
        self.mutate(|items| items.insert(0, value.into()));
    }

    /// Insert several values at the front, keeping their order.
    pub fn unshift_many<I: IntoIterator<Item = Value>>(&self, values: I) {
        self.mutate(|items| {
            items.splice(0..0, values);
        });
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `insert` in their place. Out-of-range bounds are clamped.
    pub fn splice<I: IntoIterator<Item = Value>>(
        &self,
        start: usize,
        delete_count: usize,
        insert: I,
    ) -> Vec<Value> {
        self.mutate(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, insert).collect()
        })
    }

    /// Sort in place by [`Value::natural_cmp`].
    pub fn sort(&self) {
        self.mutate(|items| items.sort_by(Value::natural_cmp));
    }

    /// Sort by `compare`. The comparator may read this collection; it sees
    /// the contents from before the sort.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut sorted = self.snapshot();
        sorted.sort_by(compare);
        self.mutate(|items| *items = sorted);
    }

    pub fn reverse(&self) {
        self.mutate(|items| items.reverse());
    }

    /// Truncate, or grow with `null`, to exactly `len` elements.
    pub fn set_len(&self, len: usize) {
        self.mutate(|items| items.resize(len, Value::Null));
    }

    /// Assign one element. Assigning past the end grows with `null`.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        self.mutate(|items| {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            items[index] = value.into();
        });
    }

    /// Replace the whole contents.
    pub fn replace(&self, values: Vec<Value>) {
        self.mutate(|items| *items = values);
    }

    /// Notify subscribers without changing anything.
    pub fn mark_dirty(&self) {
        self.notify();
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let result = f(&mut self.inner.items.borrow_mut());
        self.notify();
        result
    }

    fn notify(&self) {
        self.inner.version.set(self.inner.version.get() + 1);

        // Callbacks may subscribe or unsubscribe, so run them on a copy
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a callback run after every mutation.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> CollectionSubscription {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        CollectionSubscription {
            collection: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }
}

impl fmt::Debug for ObservableCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableCollection")
            .field("items", &*self.inner.items.borrow())
            .field("version", &self.version())
            .finish()
    }
}

/// Guard returned by [`ObservableCollection::subscribe`].
///
/// Dropping it removes the callback.
pub struct CollectionSubscription {
    collection: Weak<CollectionInner>,
    id: u64,
}

impl CollectionSubscription {
    /// Whether the collection still exists.
    pub fn is_live(&self) -> bool {
        self.collection.strong_count() > 0
    }
}

impl Drop for CollectionSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.collection.upgrade() {
            inner
                .subscribers
                .borrow_mut()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for CollectionSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSubscription")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
