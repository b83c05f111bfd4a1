//! Clone and Set: prepare the working copy an update writes

use std::sync::Arc;

use serde_json::{Map, Value};

use super::base::OperatorBase;
use super::errors::ExecutionError;
use super::eval::eval_error;
use super::operator::Operator;
use crate::context::{ExecContext, Phase, PipelineConfig};
use crate::plan;
use crate::value::AnnotatedValue;

/// Copies the document bound to `alias` into the row's `clone` attachment.
#[derive(Debug)]
pub struct CloneDocument {
    base: OperatorBase,
    alias: String,
}

impl CloneDocument {
    pub fn new(alias: &str, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Clone", Phase::Update, config),
            alias: alias.to_string(),
        }
    }
}

impl Operator for CloneDocument {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Self {
            base: self.base.copy(),
            alias: self.alias.clone(),
        })
    }

    fn process_item(&mut self, mut item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let Some(target) = item.field(&self.alias).cloned() else {
            ctx.error(ExecutionError::internal(
                self.base.name(),
                format!("no document bound to {}", self.alias),
            ));
            return false;
        };
        item.attachments_mut().clone = Some(target);
        self.base.send(item)
    }
}

/// Applies SET and UNSET terms to the `clone` attachment.
#[derive(Debug)]
pub struct Set {
    base: OperatorBase,
    plan: Arc<plan::Set>,
}

impl Set {
    pub fn new(plan: Arc<plan::Set>, config: &PipelineConfig) -> Self {
        Self {
            base: OperatorBase::new("Set", Phase::Update, config),
            plan,
        }
    }
}

impl Operator for Set {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
        })
    }

    fn process_item(&mut self, mut item: AnnotatedValue, ctx: &Arc<ExecContext>) -> bool {
        let Some(mut working) = item.attachments_mut().clone.take() else {
            ctx.error(ExecutionError::internal(self.base.name(), "row carries no clone to update"));
            return false;
        };
        for term in &self.plan.terms {
            match &term.value {
                Some(expr) => match expr.evaluate(&item, ctx) {
                    Ok(value) => set_path(&mut working, &term.path, value),
                    Err(err) => {
                        ctx.error(eval_error(self.base.name(), err));
                        return false;
                    }
                },
                None => unset_path(&mut working, &term.path),
            }
        }
        item.attachments_mut().clone = Some(working);
        self.base.send(item)
    }
}

/// Assigns `value` at a dotted path, creating intermediate objects.
pub(crate) fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(obj) = current else {
            return;
        };
        if parts.peek().is_none() {
            obj.insert(part.to_string(), value);
            return;
        }
        current = obj.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

pub(crate) fn unset_path(doc: &mut Value, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (
            parent.split('.').try_fold(&mut *doc, |cur, part| cur.get_mut(part)),
            last,
        ),
        None => (Some(doc), path),
    };
    if let Some(Value::Object(obj)) = parent {
        obj.remove(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_unset_paths() {
        let mut doc = json!({"a": 1, "b": {"c": 2}});
        set_path(&mut doc, "b.d", json!(3));
        set_path(&mut doc, "x.y.z", json!(true));
        unset_path(&mut doc, "a");
        unset_path(&mut doc, "b.c");
        unset_path(&mut doc, "nope.c");
        assert_eq!(doc, json!({"b": {"d": 3}, "x": {"y": {"z": true}}}));
    }
}
