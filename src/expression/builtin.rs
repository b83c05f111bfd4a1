//! Built-in expressions

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{is_truthy, ExprRef, Expression, ExpressionResult};
use crate::context::ExecContext;
use crate::value::{collate, AnnotatedValue};

/// A literal.
#[derive(Debug, Clone)]
pub struct Constant(pub Value);

impl Expression for Constant {
    fn evaluate(&self, _item: &AnnotatedValue, _ctx: &ExecContext) -> ExpressionResult<Value> {
        Ok(self.0.clone())
    }

    fn static_truth(&self) -> Option<bool> {
        Some(is_truthy(&self.0))
    }
}

/// A dotted field path into the document body.
#[derive(Debug, Clone)]
pub struct Field {
    path: Vec<String>,
}

impl Field {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.split('.').map(str::to_string).collect(),
        }
    }
}

impl Expression for Field {
    fn evaluate(&self, item: &AnnotatedValue, _ctx: &ExecContext) -> ExpressionResult<Value> {
        let mut current = item.value();
        for step in &self.path {
            match current.get(step.as_str()) {
                Some(next) => current = next,
                None => return Ok(Value::Null),
            }
        }
        Ok(current.clone())
    }
}

/// The document key bound to an alias (`META(alias).id`).
#[derive(Debug, Clone)]
pub struct MetaId {
    alias: Option<String>,
}

impl Expression for MetaId {
    fn evaluate(&self, item: &AnnotatedValue, _ctx: &ExecContext) -> ExpressionResult<Value> {
        let key = match &self.alias {
            Some(alias) => item.key_for(alias),
            None => item.document_key(),
        };
        Ok(key.map_or(Value::Null, |k| Value::String(k.to_string())))
    }
}

/// A value projected by a covering index scan.
#[derive(Debug, Clone)]
pub struct Cover {
    name: String,
}

impl Expression for Cover {
    fn evaluate(&self, item: &AnnotatedValue, _ctx: &ExecContext) -> ExpressionResult<Value> {
        Ok(item
            .attachments()
            .covers
            .as_ref()
            .and_then(|c| c.get(&self.name))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[derive(Debug)]
struct Equals(ExprRef, ExprRef);

impl Expression for Equals {
    fn evaluate(&self, item: &AnnotatedValue, ctx: &ExecContext) -> ExpressionResult<Value> {
        let lhs = self.0.evaluate(item, ctx)?;
        let rhs = self.1.evaluate(item, ctx)?;
        if lhs.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::Bool(collate(&lhs, &rhs) == Ordering::Equal))
    }
}

#[derive(Debug)]
struct And(Vec<ExprRef>);

impl Expression for And {
    fn evaluate(&self, item: &AnnotatedValue, ctx: &ExecContext) -> ExpressionResult<Value> {
        for term in &self.0 {
            if !is_truthy(&term.evaluate(item, ctx)?) {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }

    fn static_truth(&self) -> Option<bool> {
        let mut all_true = true;
        for term in &self.0 {
            match term.static_truth() {
                Some(false) => return Some(false),
                Some(true) => {}
                None => all_true = false,
            }
        }
        all_true.then_some(true)
    }
}

#[derive(Debug)]
struct Not(ExprRef);

impl Expression for Not {
    fn evaluate(&self, item: &AnnotatedValue, ctx: &ExecContext) -> ExpressionResult<Value> {
        Ok(Value::Bool(!is_truthy(&self.0.evaluate(item, ctx)?)))
    }

    fn static_truth(&self) -> Option<bool> {
        self.0.static_truth().map(|t| !t)
    }
}

type EvalFn = dyn Fn(&AnnotatedValue) -> ExpressionResult<Value> + Send + Sync;

/// An expression backed by a closure.
pub struct FnExpression(Arc<EvalFn>);

impl fmt::Debug for FnExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExpression")
    }
}

impl Expression for FnExpression {
    fn evaluate(&self, item: &AnnotatedValue, _ctx: &ExecContext) -> ExpressionResult<Value> {
        (self.0)(item)
    }
}

pub fn constant(value: Value) -> ExprRef {
    Arc::new(Constant(value))
}

pub fn field(path: &str) -> ExprRef {
    Arc::new(Field::new(path))
}

pub fn meta_id(alias: Option<&str>) -> ExprRef {
    Arc::new(MetaId {
        alias: alias.map(str::to_string),
    })
}

pub fn cover(name: &str) -> ExprRef {
    Arc::new(Cover {
        name: name.to_string(),
    })
}

pub fn eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    Arc::new(Equals(lhs, rhs))
}

pub fn and(terms: Vec<ExprRef>) -> ExprRef {
    Arc::new(And(terms))
}

pub fn not(term: ExprRef) -> ExprRef {
    Arc::new(Not(term))
}

pub fn func<F>(f: F) -> ExprRef
where
    F: Fn(&AnnotatedValue) -> ExpressionResult<Value> + Send + Sync + 'static,
{
    Arc::new(FnExpression(Arc::new(f)))
}
