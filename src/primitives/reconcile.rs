//! List reconciliation - keys, keyed move planning and derived locals.
//!
//! # Key policy
//!
//! Without a key expression the key of position `i` is `i.to_string()`:
//! identity is positional, instances are never matched by content, and a
//! pass only grows or shrinks the tail before rebinding every survivor to
//! its new element. `shift()` on `[4, 2, 3, 1]` therefore keeps instances 0-2,
//! rebinds them to `2, 3, 1`, and destroys instance 3.
//!
//! With a key expression every element is keyed by evaluating it with the
//! element bound. Keys must be unique within a pass; a duplicate aborts the
//! pass before anything is touched.
//!
//! # Keyed moves
//!
//! [`plan_keyed`] matches old and new key sequences. Keys only in the old
//! sequence are destroyed, keys only in the new one are created, and among the
//! survivors the longest run already in relative order stays put while the
//! rest are moved:
//!
//! ```text
//! old: a b c d      new: d a b c
//! sources:  [3, 0, 1, 2]   LIS = 0 1 2 → only `d` moves
//! ```

use std::collections::HashMap;

use crate::engine::{Locals, LocalsFrame};
use crate::error::ReconcileError;
use crate::expression::{Evaluator, Expression};
use crate::types::{LocalChanges, Value};

// =============================================================================
// Derived locals
// =============================================================================

/// Locals bound for one instance in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemLocals {
    pub item: Value,
    pub index: usize,
    pub length: usize,
    pub key: String,
}

impl ItemLocals {
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn first(&self) -> bool {
        self.index == 0
    }

    pub fn last(&self) -> bool {
        self.index + 1 == self.length
    }

    pub fn odd(&self) -> bool {
        self.number() % 2 == 1
    }

    pub fn even(&self) -> bool {
        !self.odd()
    }

    /// Which locals differ from `previous`.
    pub fn changes(&self, previous: &ItemLocals) -> LocalChanges {
        let mut changes = LocalChanges::NONE;
        if self.item != previous.item {
            changes |= LocalChanges::ITEM;
        }
        if self.index != previous.index {
            changes |= LocalChanges::INDEX | LocalChanges::NUMBER;
        }
        if self.length != previous.length {
            changes |= LocalChanges::LENGTH;
        }
        if self.first() != previous.first() {
            changes |= LocalChanges::FIRST;
        }
        if self.last() != previous.last() {
            changes |= LocalChanges::LAST;
        }
        if self.odd() != previous.odd() {
            changes |= LocalChanges::ODD | LocalChanges::EVEN;
        }
        if self.key != previous.key {
            changes |= LocalChanges::KEY;
        }
        changes
    }

    /// Frame bindings: the fixed positional set plus the element under
    /// `local_name`. The element binding wins if `local_name` collides with
    /// a positional name.
    pub fn to_locals(&self, local_name: &str) -> Locals {
        let before = [
            ("number", Value::from(self.number())),
            ("first", Value::Bool(self.first())),
            ("last", Value::Bool(self.last())),
            ("odd", Value::Bool(self.odd())),
            ("even", Value::Bool(self.even())),
        ];
        let after = [
            ("index", Value::from(self.index)),
            ("length", Value::from(self.length)),
            ("key", Value::from(self.key.as_str())),
        ];
        let unshadowed = |(name, _): &(&str, Value)| *name != local_name;
        let owned = |(name, value): (&str, Value)| (name.to_string(), value);

        // Own locals compare in insertion order: the element sits after `even`
        let mut locals: Locals = before.into_iter().filter(unshadowed).map(owned).collect();
        locals.insert(local_name.to_string(), self.item.clone());
        locals.extend(after.into_iter().filter(unshadowed).map(owned));
        locals
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Default keys: the decimal position.
pub fn positional_keys(length: usize) -> Vec<String> {
    (0..length).map(|i| i.to_string()).collect()
}

/// Evaluate `key` once per element, with the element bound under
/// `local_name` and its position under `index`.
pub fn evaluate_keys(
    evaluator: &dyn Evaluator,
    key: &Expression,
    snapshot: &[Value],
    host_frame: &LocalsFrame,
    local_name: &str,
) -> Result<Vec<String>, ReconcileError> {
    let mut keys = Vec::with_capacity(snapshot.len());
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(snapshot.len());

    for (i, item) in snapshot.iter().enumerate() {
        let mut bound = Locals::with_capacity(2);
        bound.insert(local_name.to_string(), item.clone());
        bound.insert("index".into(), Value::from(i));
        let value = evaluator.evaluate(key, &host_frame.child(bound))?;
        let key = key_string(&value);

        if let Some(&first) = seen.get(&key) {
            return Err(ReconcileError::KeyCollision {
                key,
                first,
                second: i,
            });
        }
        seen.insert(key.clone(), i);
        keys.push(key);
    }
    Ok(keys)
}

fn key_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Keyed plan
// =============================================================================

/// How to turn the old instance order into the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedPlan {
    /// For each new position, the old position reused there (or `None` to create).
    pub sources: Vec<Option<usize>>,
    /// For each new position, whether the reused instance stays where it is.
    pub stable: Vec<bool>,
    /// Old positions whose keys disappeared, ascending.
    pub removed: Vec<usize>,
}

impl KeyedPlan {
    pub fn created(&self) -> usize {
        self.sources.iter().filter(|s| s.is_none()).count()
    }

    pub fn moved(&self) -> usize {
        self.sources
            .iter()
            .zip(&self.stable)
            .filter(|(source, stable)| source.is_some() && !**stable)
            .count()
    }
}

/// Match old keys against new keys. Both sequences must be duplicate-free.
pub fn plan_keyed(old_keys: &[String], new_keys: &[String]) -> KeyedPlan {
    let old_index: HashMap<&str, usize> = old_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    let sources: Vec<Option<usize>> = new_keys
        .iter()
        .map(|k| old_index.get(k.as_str()).copied())
        .collect();

    let mut kept = vec![false; old_keys.len()];
    for source in sources.iter().flatten() {
        kept[*source] = true;
    }
    let removed = kept
        .iter()
        .enumerate()
        .filter(|(_, kept)| !**kept)
        .map(|(i, _)| i)
        .collect();

    // Survivors in new order, as (new position, old position)
    let survivors: Vec<(usize, usize)> = sources
        .iter()
        .enumerate()
        .filter_map(|(new, old)| old.map(|old| (new, old)))
        .collect();
    let olds: Vec<usize> = survivors.iter().map(|(_, old)| *old).collect();

    let mut stable = vec![false; new_keys.len()];
    for i in longest_increasing_subsequence(&olds) {
        stable[survivors[i].0] = true;
    }

    KeyedPlan {
        sources,
        stable,
        removed,
    }
}

/// Positions in `seq` forming one longest strictly increasing subsequence.
pub fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k] = position of the smallest tail of an increasing run of length k+1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, value) in seq.iter().enumerate() {
        let at = tails.partition_point(|&t| seq[t] < *value);
        if at > 0 {
            prev[i] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{HostEvaluator, HostProperties};
    use std::rc::Rc;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn locals_at(index: usize, length: usize, item: i64) -> ItemLocals {
        ItemLocals {
            item: Value::from(item),
            index,
            length,
            key: index.to_string(),
        }
    }

    #[test]
    fn test_derived_locals_first_instance() {
        let locals = locals_at(0, 4, 4).to_locals("item");
        let expected: Locals = [
            ("number", Value::from(1)),
            ("first", Value::Bool(true)),
            ("last", Value::Bool(false)),
            ("odd", Value::Bool(true)),
            ("even", Value::Bool(false)),
            ("item", Value::from(4)),
            ("index", Value::from(0)),
            ("length", Value::from(4)),
            ("key", Value::from("0")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(locals, expected);
    }

    #[test]
    fn test_derived_locals_last_even() {
        let locals = locals_at(3, 4, 1);
        assert_eq!(locals.number(), 4);
        assert!(locals.last());
        assert!(locals.even());
        assert!(!locals.first());
    }

    #[test]
    fn test_element_local_shadows_positional_name() {
        let locals = locals_at(2, 4, 9).to_locals("index");
        assert_eq!(locals.get("index"), Some(&Value::from(9)));

        let names: Vec<&str> = locals.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            ["number", "first", "last", "odd", "even", "index", "length", "key"]
        );
    }

    #[test]
    fn test_changes_after_shift() {
        // Instance 1 of [4,2,3,1] after shift → [2,3,1]
        let before = locals_at(1, 4, 2);
        let after = locals_at(1, 3, 3);
        let changes = after.changes(&before);
        assert_eq!(changes, LocalChanges::ITEM | LocalChanges::LENGTH);

        let unchanged = before.changes(&before.clone());
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_last_flag_change_detected() {
        let before = locals_at(2, 4, 3);
        let after = locals_at(2, 3, 3);
        assert!(after.changes(&before).contains(LocalChanges::LAST));
    }

    #[test]
    fn test_positional_keys() {
        assert_eq!(positional_keys(3), keys(&["0", "1", "2"]));
        assert!(positional_keys(0).is_empty());
    }

    #[test]
    fn test_evaluate_keys_and_collisions() {
        let evaluator = HostEvaluator::new(Rc::new(HostProperties::new()));
        let key = Expression::parse("@todo.id").unwrap();
        let frame = LocalsFrame::root();

        let snapshot = vec![Value::record([("id", 7)]), Value::record([("id", "x")])];
        assert_eq!(
            evaluate_keys(&evaluator, &key, &snapshot, &frame, "todo"),
            Ok(keys(&["7", "x"]))
        );

        let dup = vec![
            Value::record([("id", 1)]),
            Value::record([("id", 2)]),
            Value::record([("id", 1)]),
        ];
        assert_eq!(
            evaluate_keys(&evaluator, &key, &dup, &frame, "todo"),
            Err(ReconcileError::KeyCollision {
                key: "1".into(),
                first: 0,
                second: 2
            })
        );
    }

    #[test]
    fn test_plan_rotation_moves_one() {
        let plan = plan_keyed(&keys(&["a", "b", "c", "d"]), &keys(&["d", "a", "b", "c"]));
        assert_eq!(plan.sources, vec![Some(3), Some(0), Some(1), Some(2)]);
        assert_eq!(plan.stable, vec![false, true, true, true]);
        assert_eq!(plan.moved(), 1);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn test_plan_insert_and_remove() {
        let plan = plan_keyed(&keys(&["a", "b", "c"]), &keys(&["a", "x", "c"]));
        assert_eq!(plan.sources, vec![Some(0), None, Some(2)]);
        assert_eq!(plan.removed, vec![1]);
        assert_eq!(plan.created(), 1);
        assert_eq!(plan.moved(), 0);
    }

    #[test]
    fn test_plan_reverse() {
        let plan = plan_keyed(&keys(&["a", "b", "c"]), &keys(&["c", "b", "a"]));
        assert_eq!(plan.moved(), 2, "one survivor stays, two move");
    }

    #[test]
    fn test_lis() {
        assert_eq!(longest_increasing_subsequence(&[3, 0, 1, 2]), vec![1, 2, 3]);
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[2, 1, 0]).len(), 1);
        assert_eq!(longest_increasing_subsequence(&[0, 4, 1, 2, 5, 3]), vec![0, 2, 3, 5]);
    }
}
