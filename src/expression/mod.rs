//! Expression evaluation capability
//!
//! The engine never interprets expression syntax. It calls
//! [`Expression::evaluate`] against the current document and inspects the
//! result's truthiness or type. A handful of built-in expressions cover what
//! plans need for keys, covers and join conditions; anything richer is
//! supplied by the caller as another `Expression` implementation.

mod builtin;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::context::ExecContext;
use crate::value::AnnotatedValue;

pub use builtin::{and, constant, cover, eq, field, func, meta_id, not, Constant, Cover, Field, FnExpression, MetaId};

/// Failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExpressionError(pub String);

impl ExpressionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for expression evaluation
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// An evaluable expression. Missing values evaluate to `Value::Null`.
pub trait Expression: Send + Sync + fmt::Debug {
    /// Evaluates the expression against `item`.
    fn evaluate(&self, item: &AnnotatedValue, ctx: &ExecContext) -> ExpressionResult<Value>;

    /// The truth value if it is known without evaluation.
    fn static_truth(&self) -> Option<bool> {
        None
    }
}

/// Shared handle to an expression held by a plan node.
pub type ExprRef = Arc<dyn Expression>;

/// Truthiness of a condition result: only `true`, non-zero numbers and
/// non-empty strings, arrays and objects are true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// Evaluates a condition; `None` means "no condition" and is true.
pub fn evaluate_condition(
    condition: Option<&ExprRef>,
    item: &AnnotatedValue,
    ctx: &ExecContext,
) -> ExpressionResult<bool> {
    match condition {
        None => Ok(true),
        Some(expr) => match expr.static_truth() {
            Some(truth) => Ok(truth),
            None => expr.evaluate(item, ctx).map(|v| is_truthy(&v)),
        },
    }
}

/// Evaluates every expression of a composite key.
pub fn evaluate_all(
    exprs: &[ExprRef],
    item: &AnnotatedValue,
    ctx: &ExecContext,
) -> ExpressionResult<Vec<Value>> {
    exprs.iter().map(|e| e.evaluate(item, ctx)).collect()
}
