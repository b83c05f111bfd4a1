//! Expression helpers shared by operators

use serde_json::Value;

use super::errors::{ExecutionError, ExecutionResult};
use crate::context::ExecContext;
use crate::expression::{ExprRef, ExpressionError};
use crate::value::AnnotatedValue;

pub(crate) fn eval_error(operator: &str, err: ExpressionError) -> ExecutionError {
    ExecutionError::evaluation(operator, err.0)
}

/// Evaluates an optional LIMIT/OFFSET style expression to a count.
///
/// Counts are evaluated against the parent row when there is one. Negative
/// numbers clamp to zero; anything else that is not a number is an error.
pub(crate) fn evaluate_count(
    operator: &str,
    expr: Option<&ExprRef>,
    parent: Option<&AnnotatedValue>,
    ctx: &ExecContext,
) -> ExecutionResult<Option<u64>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let empty = AnnotatedValue::empty_object();
    let value = expr
        .evaluate(parent.unwrap_or(&empty), ctx)
        .map_err(|e| eval_error(operator, e))?;
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(Some(u))
            } else if let Some(f) = n.as_f64() {
                Ok(Some(if f <= 0.0 { 0 } else { f as u64 }))
            } else {
                Ok(Some(0))
            }
        }
        other => Err(ExecutionError::evaluation(
            operator,
            format!("count must be a number, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::constant;
    use serde_json::json;

    #[test]
    fn test_counts() {
        let ctx = ExecContext::default();
        assert_eq!(evaluate_count("Limit", None, None, &ctx), Ok(None));
        assert_eq!(evaluate_count("Limit", Some(&constant(json!(3))), None, &ctx), Ok(Some(3)));
        assert_eq!(evaluate_count("Limit", Some(&constant(json!(-2))), None, &ctx), Ok(Some(0)));
        assert!(evaluate_count("Limit", Some(&constant(json!("x"))), None, &ctx).is_err());
    }
}
