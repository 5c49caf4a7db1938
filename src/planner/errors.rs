//! Planner error types
//!
//! Error codes:
//! - EMBER_QUERY_INVALID (REJECT) - criteria could not be normalized
//! - EMBER_QUERY_UNINDEXED_FIELD (REJECT) - strict mode query on non-indexed field(s)

use std::fmt;

/// Severity levels for planner errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Client request rejected
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerErrorCode {
    /// Malformed criteria
    EmberQueryInvalid,
    /// Field(s) without an index referenced under strict mode
    EmberQueryUnindexedField,
}

impl PlannerErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            PlannerErrorCode::EmberQueryInvalid => "EMBER_QUERY_INVALID",
            PlannerErrorCode::EmberQueryUnindexedField => "EMBER_QUERY_UNINDEXED_FIELD",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for PlannerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Planner error type with full context
#[derive(Debug, Clone)]
pub struct PlannerError {
    code: PlannerErrorCode,
    message: String,
    /// Offending field names, in the order the criteria reference them
    fields: Vec<String>,
}

impl PlannerError {
    /// Create a query invalid error
    pub fn query_invalid(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::EmberQueryInvalid,
            message: reason.into(),
            fields: Vec::new(),
        }
    }

    /// Create an unindexed field error naming every offending field.
    pub fn unindexed_fields(fields: Vec<String>, available: &[String]) -> Self {
        let quoted: Vec<String> = fields.iter().map(|f| format!("'{}'", f)).collect();
        let subject = if fields.len() == 1 {
            format!("Field {} is not indexed", quoted.join(", "))
        } else {
            format!("Fields {} are not indexed", quoted.join(", "))
        };
        let listing = if available.is_empty() {
            "No fields are indexed".to_string()
        } else {
            format!("Available indexed fields: {}", available.join(", "))
        };
        Self {
            code: PlannerErrorCode::EmberQueryUnindexedField,
            message: format!("{} (indexed query mode is strict). {}", subject, listing),
            fields,
        }
    }

    pub fn code(&self) -> PlannerErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for PlannerError {}

pub type PlannerResult<T> = Result<T, PlannerError>;
