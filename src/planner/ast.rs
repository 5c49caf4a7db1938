//! Criteria normalization
//!
//! Caller criteria arrive as JSON in several shapes: bare values, arrays,
//! operator objects with symbolic (`>`, `in`, `regex`) or `$`-prefixed
//! operators, and `$and` / `$or` / `$not` composition. `Criteria::parse`
//! normalizes all of them into one tagged union so evaluation matches on
//! variants instead of probing JSON shape.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::errors::{PlannerError, PlannerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Whether `ordering` (value compared to operand) satisfies the operator
    pub fn accepts(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Gt => ordering == Greater,
            CompareOp::Gte => ordering != Less,
            CompareOp::Lt => ordering == Less,
            CompareOp::Lte => ordering != Greater,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }
}

/// A compiled `$regex`, with `$options` already applied
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str, options: &str) -> PlannerResult<Self> {
        let mut builder = RegexBuilder::new(source);
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(PlannerError::query_invalid(format!(
                        "Unsupported regex option '{}'",
                        other
                    )))
                }
            };
        }
        let regex = builder
            .build()
            .map_err(|e| PlannerError::query_invalid(format!("Invalid regex '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Anchored, escaped, case-insensitive equality pattern
    pub fn equals_ignore_case(text: &str) -> PlannerResult<Self> {
        Self::new(&format!("^{}$", regex::escape(text)), "i")
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One operator applied to a field
#[derive(Debug, Clone)]
pub enum Condition {
    /// Equality; for array fields, membership
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Array field holds every value
    All(Vec<Value>),
    Compare(CompareOp, Value),
    Regex(Pattern),
    /// Substring for strings, element for arrays
    Contains(Value),
    Exists(bool),
}

#[derive(Debug, Clone)]
pub enum Criteria {
    /// Matches every record
    All,
    /// Matches no record
    Nothing,
    Field {
        field: String,
        conditions: Vec<Condition>,
    },
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
}

impl Criteria {
    /// Normalizes JSON criteria.
    ///
    /// `null` and `{}` match everything. Several top-level keys are ANDed.
    pub fn parse(value: &Value) -> PlannerResult<Self> {
        match value {
            Value::Null => Ok(Criteria::All),
            Value::Object(map) => parse_object(map),
            other => Err(PlannerError::query_invalid(format!(
                "Criteria must be an object, got {}",
                crate::schema::json_type_name(other)
            ))),
        }
    }

    pub fn field(field: impl Into<String>, condition: Condition) -> Self {
        Criteria::Field {
            field: field.into(),
            conditions: vec![condition],
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::field(field, Condition::Eq(value))
    }

    /// Field names referenced anywhere in the tree, first-seen order, no repeats
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Criteria::All | Criteria::Nothing => {}
            Criteria::Field { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Criteria::And(children) | Criteria::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Criteria::Not(child) => child.collect_fields(out),
        }
    }
}

fn parse_object(map: &Map<String, Value>) -> PlannerResult<Criteria> {
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        let part = match key.as_str() {
            "$and" => Criteria::And(parse_list(key, value)?),
            "$or" => {
                let children = parse_list(key, value)?;
                if children.is_empty() {
                    Criteria::Nothing
                } else {
                    Criteria::Or(children)
                }
            }
            "$not" => Criteria::Not(Box::new(parse_not(value)?)),
            op if op.starts_with('$') => {
                return Err(PlannerError::query_invalid(format!(
                    "Unknown logical operator '{}'",
                    op
                )))
            }
            field => Criteria::Field {
                field: field.to_string(),
                conditions: parse_conditions(field, value)?,
            },
        };
        parts.push(part);
    }

    Ok(match parts.len() {
        0 => Criteria::All,
        1 => parts.remove(0),
        _ => Criteria::And(parts),
    })
}

fn parse_list(op: &str, value: &Value) -> PlannerResult<Vec<Criteria>> {
    match value {
        Value::Array(items) => items.iter().map(Criteria::parse).collect(),
        _ => Err(PlannerError::query_invalid(format!(
            "'{}' expects an array of criteria",
            op
        ))),
    }
}

/// An empty `$not` body matches nothing, so `$not: {}` excludes nothing.
fn parse_not(value: &Value) -> PlannerResult<Criteria> {
    match value {
        Value::Object(map) if map.is_empty() => Ok(Criteria::Nothing),
        Value::Object(map) => parse_object(map),
        Value::Array(_) => {
            let children = parse_list("$not", value)?;
            Ok(if children.is_empty() {
                Criteria::Nothing
            } else {
                Criteria::And(children)
            })
        }
        _ => Err(PlannerError::query_invalid("'$not' expects a criteria object")),
    }
}

fn operator_name(key: &str) -> Option<&'static str> {
    Some(match key {
        "$eq" | "=" | "==" => "eq",
        "$ne" | "!=" => "ne",
        "$gt" | ">" => "gt",
        "$gte" | ">=" => "gte",
        "$lt" | "<" => "lt",
        "$lte" | "<=" => "lte",
        "$in" | "in" => "in",
        "$nin" | "nin" => "nin",
        "$all" => "all",
        "$regex" | "regex" => "regex",
        "$options" => "options",
        "$contains" | "contains" => "contains",
        "$exists" => "exists",
        _ => return None,
    })
}

fn parse_conditions(field: &str, value: &Value) -> PlannerResult<Vec<Condition>> {
    let ops = match value {
        Value::Array(items) => return Ok(vec![Condition::In(items.clone())]),
        Value::Object(ops) if !ops.is_empty() => ops,
        other => return Ok(vec![Condition::Eq(other.clone())]),
    };

    let recognized = ops.keys().filter(|k| operator_name(k).is_some()).count();
    if recognized == 0 && !ops.keys().any(|k| k.starts_with('$')) {
        // A plain object is an equality operand
        return Ok(vec![Condition::Eq(value.clone())]);
    }
    if recognized != ops.len() {
        let unknown = ops.keys().find(|k| operator_name(k).is_none()).cloned().unwrap_or_default();
        return Err(PlannerError::query_invalid(format!(
            "Unknown operator '{}' on field '{}'",
            unknown, field
        )));
    }

    let options = match ops.get("$options") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(PlannerError::query_invalid(format!(
                "'$options' on field '{}' must be a string",
                field
            )))
        }
        None => None,
    };

    let mut conditions = Vec::with_capacity(ops.len());
    for (key, operand) in ops {
        let condition = match operator_name(key).unwrap_or_default() {
            "eq" => Condition::Eq(operand.clone()),
            "ne" => Condition::Ne(operand.clone()),
            "gt" => Condition::Compare(CompareOp::Gt, operand.clone()),
            "gte" => Condition::Compare(CompareOp::Gte, operand.clone()),
            "lt" => Condition::Compare(CompareOp::Lt, operand.clone()),
            "lte" => Condition::Compare(CompareOp::Lte, operand.clone()),
            "in" => Condition::In(as_list(operand)),
            "nin" => Condition::Nin(as_list(operand)),
            "all" => Condition::All(as_list(operand)),
            "contains" => Condition::Contains(operand.clone()),
            "regex" => match operand {
                Value::String(source) => Condition::Regex(Pattern::new(source, options.unwrap_or(""))?),
                _ => {
                    return Err(PlannerError::query_invalid(format!(
                        "'$regex' on field '{}' must be a string",
                        field
                    )))
                }
            },
            "exists" => match operand {
                Value::Bool(b) => Condition::Exists(*b),
                _ => {
                    return Err(PlannerError::query_invalid(format!(
                        "'$exists' on field '{}' must be a boolean",
                        field
                    )))
                }
            },
            "options" => {
                if !ops.contains_key("$regex") && !ops.contains_key("regex") {
                    return Err(PlannerError::query_invalid(format!(
                        "'$options' on field '{}' requires '$regex'",
                        field
                    )));
                }
                continue;
            }
            _ => continue,
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn as_list(operand: &Value) -> Vec<Value> {
    match operand {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
