//! Error types.
//!
//! Errors are local to one binding. A failing binding never stops the other
//! dirty bindings of the same flush: failures are collected into
//! [`FlushOutcome`](crate::engine::FlushOutcome) as [`BindingFailure`]s and
//! reported once the pass completes.

use thiserror::Error;

use crate::types::BindingId;

/// A referenced local does not resolve anywhere in the scope chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("local `@{name}` is not defined in the enclosing scope chain")]
pub struct BindingError {
    pub name: String,
}

/// Expression evaluation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("host property `{name}` is not defined")]
    UnknownProperty { name: String },

    #[error("cannot read `.{field}` of a {kind} value")]
    NoField { field: String, kind: &'static str },

    #[error("cannot index a {kind} value")]
    NotIndexable { kind: &'static str },

    #[error("index must be an integer, got a {kind} value")]
    BadIndex { kind: &'static str },
}

/// Expression or directive text could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset} in `{input}`")]
pub struct ParseError {
    pub input: String,
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(input: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// One binding's reconciliation pass failed.
///
/// The pass is abandoned before any structural change is made, so the
/// rendered tree still reflects the previous successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("duplicate key `{key}` at positions {first} and {second}")]
    KeyCollision {
        key: String,
        first: usize,
        second: usize,
    },

    #[error("`{expression}` evaluated to a {found} value, expected a list")]
    SourceType {
        expression: String,
        found: &'static str,
    },

    #[error(transparent)]
    Evaluation(EvaluationError),

    #[error("body template {template} is not registered")]
    UnknownTemplate { template: usize },
}

impl From<EvaluationError> for ReconcileError {
    fn from(error: EvaluationError) -> Self {
        match error {
            EvaluationError::Binding(binding) => ReconcileError::Binding(binding),
            other => ReconcileError::Evaluation(other),
        }
    }
}

/// A failure attributed to one binding during a flush.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("binding {binding} (`{source_text}`): {error}")]
pub struct BindingFailure {
    pub binding: BindingId,
    pub source_text: String,
    pub error: ReconcileError,
}

/// Mounting a component failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("root template of `{component}` contains no nodes")]
    EmptyTemplate { component: String },

    #[error("template of `{component}` failed to compile: {source}")]
    Template {
        component: String,
        #[source]
        source: ParseError,
    },

    #[error("root template of `{component}` could not be instantiated")]
    Instantiate { component: String },
}
