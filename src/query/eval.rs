//! Row-level evaluation of conditions. Null compares like SQL: only `IS`/`IS NOT` match it.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::condition::{Condition, Operand, Operator};
use super::Row;

pub fn matches(cond: &Condition, row: &Row) -> bool {
    match cond {
        Condition::And { conditions } => conditions.iter().all(|c| matches(c, row)),
        Condition::Or { conditions } => conditions.iter().any(|c| matches(c, row)),
        Condition::Simple { op, left, right } => {
            let l = resolve(left, row);
            let r = resolve(right, row);
            compare(*op, &l, &r)
        }
    }
}

fn resolve(operand: &Operand, row: &Row) -> Value {
    match operand {
        Operand::Column { name } => row.get(name).cloned().unwrap_or(Value::Null),
        Operand::Literal { value } => value.clone(),
    }
}

fn compare(op: Operator, l: &Value, r: &Value) -> bool {
    match op {
        Operator::Is => l == r,
        Operator::IsNot => l != r,
        _ if l.is_null() || r.is_null() => false,
        Operator::Eq => value_cmp(l, r) == Some(Ordering::Equal),
        Operator::Ne => matches!(value_cmp(l, r), Some(o) if o != Ordering::Equal),
        Operator::Lt => value_cmp(l, r) == Some(Ordering::Less),
        Operator::Le => matches!(value_cmp(l, r), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => value_cmp(l, r) == Some(Ordering::Greater),
        Operator::Ge => matches!(value_cmp(l, r), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Like => like(l, r, false),
        Operator::ILike => like(l, r, true),
        Operator::In => r.as_array().map(|arr| arr.iter().any(|v| value_cmp(l, v) == Some(Ordering::Equal))).unwrap_or(false),
        Operator::NotIn => r.as_array().map(|arr| !arr.iter().any(|v| value_cmp(l, v) == Some(Ordering::Equal))).unwrap_or(false),
    }
}

/// Comparison between values of the same kind; mixed kinds are incomparable.
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting and cursors: null < bool < number < string < composite.
pub fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    match value_cmp(a, b) {
        Some(o) => o,
        None => kind_rank(a).cmp(&kind_rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn like(l: &Value, r: &Value, case_insensitive: bool) -> bool {
    let (Some(text), Some(pattern)) = (l.as_str(), r.as_str()) else { return false; };
    let mut regex_text = like_to_regex(pattern);
    if case_insensitive {
        regex_text.insert_str(0, "(?i)");
    }
    // an unusable pattern matches nothing
    match Regex::new(&regex_text) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

/// SQL LIKE pattern as an anchored regex: `%` -> `.*`, `_` -> `.`, everything else literal.
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ExpressionBuilder;
    use serde_json::json;

    fn row(v: Value) -> Row { v.as_object().cloned().unwrap() }

    #[test]
    fn literal_conditions() {
        let r = row(json!({"id": "a"}));
        let eb = ExpressionBuilder::new("t");
        assert!(matches(&Condition::always_true(), &r));
        assert!(!matches(&Condition::always_false(), &r));
        assert!(matches(&eb.cmp_lit(0, Operator::Eq, 0), &r));
        assert!(!matches(&eb.cmp_lit(1, Operator::Eq, 0), &r));
        assert!(matches(&eb.and([]), &r));
        assert!(!matches(&eb.or([]), &r));
    }

    #[test]
    fn null_only_matches_is() {
        let r = row(json!({"id": "a", "deletedAt": null}));
        let eb = ExpressionBuilder::new("t");
        assert!(!matches(&eb.cmp("deletedAt", Value::Null), &r));
        assert!(matches(&eb.cmp_op("deletedAt", Operator::Is, Value::Null), &r));
        assert!(matches(&eb.cmp_op("missing", Operator::Is, Value::Null), &r));
        assert!(!matches(&eb.cmp_op("id", Operator::Is, Value::Null), &r));
    }

    #[test]
    fn numeric_and_string_ordering() {
        let r = row(json!({"n": 5, "s": "bob"}));
        let eb = ExpressionBuilder::new("t");
        assert!(matches(&eb.cmp_op("n", Operator::Gt, 4.5), &r));
        assert!(matches(&eb.cmp_op("n", Operator::Le, 5), &r));
        assert!(!matches(&eb.cmp_op("n", Operator::Lt, "9"), &r));
        assert!(matches(&eb.cmp_op("s", Operator::In, json!(["al", "bob"])), &r));
        assert!(matches(&eb.cmp_op("s", Operator::NotIn, json!(["al"])), &r));
    }

    #[test]
    fn like_patterns() {
        let m = |t: &str, p: &str| like(&json!(t), &json!(p), false);
        assert!(m("hello world", "hello%"));
        assert!(m("hello", "h_llo"));
        assert!(m("abc", "%"));
        assert!(!m("abc", "a_"));
        // regex metacharacters are literal
        assert!(m("a.b(c)", "a.b(%)"));
        assert!(!m("axb", "a.b"));
        assert!(m("1+1=2", "1+1=_"));
        assert!(!like(&json!("HeLLo"), &json!("hello"), false));
        assert!(like(&json!("HeLLo"), &json!("hello"), true));
    }

    #[test]
    fn sort_is_total_across_kinds() {
        assert_eq!(sort_cmp(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(sort_cmp(&json!("a"), &json!(1)), Ordering::Greater);
        assert_eq!(sort_cmp(&json!(2), &json!(10)), Ordering::Less);
    }
}
