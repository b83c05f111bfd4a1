//! Total order over JSON values
//!
//! null < false < true < numbers < strings < arrays < objects. Numbers compare
//! numerically and exactly, even between integers and floats past 2^53,
//! with -0.0 equal to 0.0. Arrays compare element-wise, objects by length then by sorted
//! key/value pairs.

use std::cmp::Ordering;

use serde_json::{Number, Value};

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// A JSON number widened without loss.
#[derive(Clone, Copy)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    fn of(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i128::from(i))
        } else if let Some(u) = n.as_u64() {
            Self::Int(i128::from(u))
        } else {
            Self::Float(n.as_f64().unwrap_or(0.0))
        }
    }
}

/// Exact comparison of an integer against a finite float.
fn compare_int_float(i: i128, f: f64) -> Ordering {
    // every i64 and u64 lies strictly inside this range
    const BOUND: f64 = (1u128 << 127) as f64;
    if f >= BOUND {
        return Ordering::Less;
    }
    if f < -BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // `whole` is integral and below 2^127 in magnitude, so the cast is exact
    match i.cmp(&(whole as i128)) {
        Ordering::Equal if f > whole => Ordering::Less,
        Ordering::Equal if f < whole => Ordering::Greater,
        ord => ord,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (Numeric::of(x), Numeric::of(y)) {
        (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
        (Numeric::Int(a), Numeric::Float(b)) => compare_int_float(a, b),
        (Numeric::Float(a), Numeric::Int(b)) => compare_int_float(b, a).reverse(),
        // JSON numbers are never NaN
        (Numeric::Float(a), Numeric::Float(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compares two values under the collation order.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => collate_slices(x, y),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|l, r| l.0.cmp(r.0));
            ys.sort_by(|l, r| l.0.cmp(r.0));
            for ((xk, xv), (yk, yv)) in xs.iter().zip(ys.iter()) {
                let ord = xk.cmp(yk).then_with(|| collate(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compares two composite keys element-wise; a shorter prefix sorts first.
pub fn collate_slices(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = collate(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let ordered = [json!(null), json!(false), json!(true), json!(-3), json!(2.5), json!("a"), json!([1]), json!({"a": 1})];
        for pair in ordered.windows(2) {
            assert_eq!(collate(&pair[0], &pair[1]), Ordering::Less, "{:?}", pair);
        }
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(collate(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(collate(&json!(10), &json!(9.5)), Ordering::Greater);
    }

    #[test]
    fn test_large_integers_compare_exactly_with_floats() {
        let above = json!(9007199254740993u64); // 2^53 + 1
        let int = json!(9007199254740992u64);
        let float = json!(9007199254740992.0);
        assert_eq!(collate(&int, &float), Ordering::Equal);
        assert_eq!(collate(&above, &float), Ordering::Greater);
        assert_eq!(collate(&float, &above), Ordering::Less);
        assert_eq!(collate(&above, &int), Ordering::Greater);
        assert_eq!(collate(&json!(u64::MAX), &json!(1e300)), Ordering::Less);
        assert_eq!(collate(&json!(i64::MIN), &json!(-1e300)), Ordering::Greater);
        assert_eq!(collate(&json!(3), &json!(2.5)), Ordering::Greater);
        assert_eq!(collate(&json!(-3), &json!(-2.5)), Ordering::Less);
    }

    #[test]
    fn test_negative_zero_equals_zero() {
        assert_eq!(collate(&json!(-0.0), &json!(0.0)), Ordering::Equal);
        assert_eq!(collate(&json!(-0.0), &json!(0)), Ordering::Equal);
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(collate_slices(&[json!("a")], &[json!("a"), json!(1)]), Ordering::Less);
    }
}
