//! Index keys
//!
//! Ordering is deterministic: Bool < Number < Text < Term. Numbers are held
//! as order-preserving bits, so a `BTreeMap` range over `Number` keys is a
//! numeric range scan.

use serde_json::Value;

use crate::schema::FieldType;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Bool(bool),
    /// f64 in total-ordering bit form
    Number(u64),
    /// Raw string, for fields without term mapping
    Text(String),
    /// Term id, for term-mapped fields
    Term(u32),
}

impl IndexKey {
    pub fn from_number(v: f64) -> Self {
        // -0.0 and 0.0 must share a key
        let v = if v == 0.0 { 0.0 } else { v };
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        IndexKey::Number(ordered)
    }

    /// Scalar JSON value to key. Term mapping is applied by the caller.
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => n.as_f64().map(IndexKey::from_number),
            Value::String(s) => Some(IndexKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            IndexKey::Number(ordered) => {
                let bits = if (ordered >> 63) == 1 {
                    ordered ^ (1 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            _ => None,
        }
    }

    /// String form used as an object key in the index file
    pub fn to_storage_key(&self) -> String {
        match self {
            IndexKey::Bool(b) => b.to_string(),
            IndexKey::Number(_) => {
                let n = self.as_number().unwrap_or(0.0);
                if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                    format!("{}", n as i64)
                } else {
                    n.to_string()
                }
            }
            IndexKey::Text(s) => s.clone(),
            IndexKey::Term(id) => id.to_string(),
        }
    }

    /// Parses a stored key back, typed by the field it belongs to.
    ///
    /// Fields typed `any`/`object` do not record key types; keys that look
    /// like booleans or numbers come back as such.
    pub fn from_storage_key(raw: &str, field_type: FieldType, mapped: bool) -> Option<Self> {
        if mapped {
            return raw.parse::<u32>().ok().map(IndexKey::Term);
        }
        match field_type {
            FieldType::String | FieldType::StringArray => Some(IndexKey::Text(raw.to_string())),
            FieldType::Number | FieldType::NumberArray => {
                raw.parse::<f64>().ok().map(IndexKey::from_number)
            }
            FieldType::Boolean => raw.parse::<bool>().ok().map(IndexKey::Bool),
            FieldType::Object | FieldType::Any => Some(
                raw.parse::<bool>()
                    .map(IndexKey::Bool)
                    .or_else(|_| raw.parse::<f64>().map(IndexKey::from_number))
                    .unwrap_or_else(|_| IndexKey::Text(raw.to_string())),
            ),
        }
    }
}
