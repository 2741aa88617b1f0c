//! Expression evaluation against host properties and a locals frame.
//!
//! Host properties are `spark_signals` signals, so evaluating an expression
//! inside an effect subscribes that effect to every property the expression
//! reads. That is how a repeating directive notices its source being
//! reassigned (see [`crate::primitives`]).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use spark_signals::{signal, Signal};

use crate::engine::LocalsFrame;
use crate::error::EvaluationError;
use crate::types::Value;

use super::Expression;

/// Turns an expression into a value.
pub trait Evaluator {
    fn evaluate(&self, expr: &Expression, frame: &LocalsFrame) -> Result<Value, EvaluationError>;
}

// =============================================================================
// Host properties
// =============================================================================

/// Named reactive properties of a mounted component.
///
/// A lookup of a name that does not exist yet reads the `shape` signal, so an
/// effect that looked for a missing property reruns once it is defined.
pub struct HostProperties {
    signals: RefCell<IndexMap<String, Signal<Value>>>,
    shape: Signal<u64>,
}

impl Default for HostProperties {
    fn default() -> Self {
        Self {
            signals: RefCell::new(IndexMap::new()),
            shape: signal(0),
        }
    }
}

impl HostProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let properties = Self::new();
        for (name, value) in pairs {
            properties.set(name, value);
        }
        properties
    }

    /// Read a property. Reading inside an effect tracks it.
    pub fn get(&self, name: &str) -> Option<Value> {
        let existing = self.signals.borrow().get(name).cloned();
        match existing {
            Some(sig) => Some(sig.get()),
            None => {
                self.shape.get();
                None
            }
        }
    }

    /// Assign a property. Reassigning an existing property notifies the
    /// effects that read it; defining a new one notifies the effects that
    /// looked it up while it was missing.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let existing = self.signals.borrow().get(&name).cloned();
        // Set outside the borrow: effects run synchronously and read back
        match existing {
            Some(sig) => {
                sig.set(value);
            }
            None => {
                self.signals.borrow_mut().insert(name, signal(value));
                self.shape.update(|version| *version += 1);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.signals.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for HostProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProperties")
            .field("names", &self.names())
            .finish()
    }
}

// =============================================================================
// Host evaluator
// =============================================================================

/// Evaluates `@locals` through the frame chain and bare names against the
/// host's properties.
#[derive(Clone)]
pub struct HostEvaluator {
    properties: Rc<HostProperties>,
}

impl HostEvaluator {
    pub fn new(properties: Rc<HostProperties>) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &Rc<HostProperties> {
        &self.properties
    }
}

impl Evaluator for HostEvaluator {
    fn evaluate(&self, expr: &Expression, frame: &LocalsFrame) -> Result<Value, EvaluationError> {
        match expr {
            Expression::Local(name) => Ok(frame.resolve(name)?),
            Expression::Property(name) => {
                self.properties
                    .get(name)
                    .ok_or_else(|| EvaluationError::UnknownProperty { name: name.clone() })
            }
            Expression::Int(n) => Ok(Value::Int(*n)),
            Expression::Str(s) => Ok(Value::from(s.as_str())),
            Expression::Bool(b) => Ok(Value::Bool(*b)),
            Expression::Null => Ok(Value::Null),
            Expression::Field(base, field) => {
                let base = self.evaluate(base, frame)?;
                read_field(&base, field)
            }
            Expression::Index(base, index) => {
                let base = self.evaluate(base, frame)?;
                let index = self.evaluate(index, frame)?;
                read_index(&base, &index)
            }
        }
    }
}

fn read_field(base: &Value, field: &str) -> Result<Value, EvaluationError> {
    match (base, field) {
        (Value::Record(fields), _) => Ok(fields.get(field).cloned().unwrap_or_default()),
        (Value::List(list), "length") => Ok(Value::from(list.len())),
        (Value::Str(s), "length") => Ok(Value::from(s.chars().count())),
        _ => Err(EvaluationError::NoField {
            field: field.to_string(),
            kind: base.kind(),
        }),
    }
}

fn read_index(base: &Value, index: &Value) -> Result<Value, EvaluationError> {
    match (base, index) {
        (Value::List(list), Value::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| list.get(i))
            .unwrap_or_default()),
        (Value::Record(fields), Value::Str(key)) => {
            Ok(fields.get(key.as_ref()).cloned().unwrap_or_default())
        }
        (Value::List(_) | Value::Record(_), other) => Err(EvaluationError::BadIndex {
            kind: other.kind(),
        }),
        _ => Err(EvaluationError::NotIndexable { kind: base.kind() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Locals;
    use crate::error::BindingError;
    use spark_signals::effect;
    use std::cell::Cell;

    fn eval(evaluator: &HostEvaluator, frame: &LocalsFrame, src: &str) -> Result<Value, EvaluationError> {
        evaluator.evaluate(&Expression::parse(src).unwrap(), frame)
    }

    fn fixture() -> (HostEvaluator, LocalsFrame) {
        let properties = Rc::new(HostProperties::from_pairs([("items", Value::list([4, 2, 3]))]));
        let mut locals = Locals::new();
        locals.insert(
            "item".to_string(),
            Value::record([("values", Value::list([1, 2, 3]))]),
        );
        let frame = LocalsFrame::root().child(locals);
        (HostEvaluator::new(properties), frame)
    }

    #[test]
    fn test_paths_through_locals() {
        let (evaluator, frame) = fixture();
        assert_eq!(eval(&evaluator, &frame, "@item.values[0]"), Ok(Value::from(1)));
        assert_eq!(eval(&evaluator, &frame, "@item.values.length"), Ok(Value::from(3)));
        assert_eq!(eval(&evaluator, &frame, "@item.missing"), Ok(Value::Null));
        assert_eq!(eval(&evaluator, &frame, "@item.values[9]"), Ok(Value::Null));
    }

    #[test]
    fn test_host_property_lookup() {
        let (evaluator, frame) = fixture();
        let items = eval(&evaluator, &frame, "items").unwrap();
        assert_eq!(items.as_list().map(|l| l.len()), Some(3));
        assert_eq!(
            eval(&evaluator, &frame, "other"),
            Err(EvaluationError::UnknownProperty { name: "other".into() })
        );
    }

    #[test]
    fn test_unbound_local_is_binding_error() {
        let (evaluator, frame) = fixture();
        assert_eq!(
            eval(&evaluator, &frame, "@value"),
            Err(EvaluationError::Binding(BindingError { name: "value".into() }))
        );
    }

    #[test]
    fn test_type_errors() {
        let (evaluator, frame) = fixture();
        assert!(matches!(
            eval(&evaluator, &frame, "@item.values.first"),
            Err(EvaluationError::NoField { kind: "list", .. })
        ));
        assert!(matches!(
            eval(&evaluator, &frame, "3[0]"),
            Err(EvaluationError::NotIndexable { kind: "int" })
        ));
        assert!(matches!(
            eval(&evaluator, &frame, "@item.values['x']"),
            Err(EvaluationError::BadIndex { kind: "string" })
        ));
    }

    #[test]
    fn test_reassignment_replaces_value() {
        let properties = HostProperties::from_pairs([("n", Value::from(1))]);
        properties.set("n", Value::from(2));
        assert_eq!(properties.get("n"), Some(Value::from(2)));
        assert!(properties.contains("n"));
        assert_eq!(properties.names(), vec!["n".to_string()]);
    }

    #[test]
    fn test_missing_property_is_tracked_until_defined() {
        let properties = Rc::new(HostProperties::new());
        let runs = Rc::new(Cell::new(0));

        let dispose = {
            let (properties, runs) = (properties.clone(), runs.clone());
            effect(move || {
                runs.set(runs.get() + 1);
                let _ = properties.get("items");
            })
        };
        assert_eq!(runs.get(), 1);

        properties.set("items", Value::list([1, 2]));
        assert_eq!(runs.get(), 2, "defining the property reruns the reader");

        properties.set("items", Value::list([3]));
        assert_eq!(runs.get(), 3);

        dispose();
    }
}
