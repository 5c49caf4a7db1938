//! Predicate filtering for query execution
//!
//! Evaluates a criteria tree against one decoded row. The rules agree with
//! what the index answers for the same criteria, so a record matches the
//! same way whichever path reached it:
//!
//! - Numbers compare by value (`5` equals `5.0`); no other coercion
//! - On array cells, equality and comparisons hold if any element does
//! - `null` and missing cells satisfy only `$ne`, `$nin` and `$exists: false`

use std::cmp::Ordering;

use serde_json::Value;

use crate::planner::{Condition, Criteria};
use crate::schema::Schema;

/// Evaluates criteria against rows
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if `row` matches `criteria`
    pub fn matches(schema: &Schema, row: &[Value], criteria: &Criteria) -> bool {
        match criteria {
            Criteria::All => true,
            Criteria::Nothing => false,
            Criteria::Field { field, conditions } => {
                let cell = schema.value_in(row, field).unwrap_or(&Value::Null);
                conditions.iter().all(|c| Self::matches_condition(cell, c))
            }
            Criteria::And(children) => children.iter().all(|c| Self::matches(schema, row, c)),
            Criteria::Or(children) => children.iter().any(|c| Self::matches(schema, row, c)),
            Criteria::Not(child) => !Self::matches(schema, row, child),
        }
    }

    fn matches_condition(cell: &Value, condition: &Condition) -> bool {
        match condition {
            Condition::Eq(expected) => contains_value(cell, expected),
            Condition::Ne(expected) => !contains_value(cell, expected),
            Condition::In(values) => values.iter().any(|v| contains_value(cell, v)),
            Condition::Nin(values) => !values.iter().any(|v| contains_value(cell, v)),
            Condition::All(values) => {
                !values.is_empty() && values.iter().all(|v| contains_value(cell, v))
            }
            Condition::Compare(op, operand) => {
                elements(cell).any(|v| compare(v, operand).map(|o| op.accepts(o)).unwrap_or(false))
            }
            Condition::Regex(pattern) => elements(cell)
                .filter_map(Value::as_str)
                .any(|s| pattern.is_match(s)),
            Condition::Contains(Value::String(needle)) => elements(cell)
                .filter_map(Value::as_str)
                .any(|s| s.contains(needle.as_str())),
            Condition::Contains(other) => contains_value(cell, other),
            Condition::Exists(wanted) => !cell.is_null() == *wanted,
        }
    }
}

/// The cell itself, or its elements when it is an array
fn elements(cell: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match cell {
        Value::Array(items) => Box::new(items.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

/// Equality for a scalar cell, membership for an array cell
fn contains_value(cell: &Value, expected: &Value) -> bool {
    if values_equal(cell, expected) {
        return true;
    }
    match cell {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Orders `value` against `operand`; only number/number and string/string compare
fn compare(value: &Value, operand: &Value) -> Option<Ordering> {
    match (value, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}
