//! Schema error types
//!
//! Error codes:
//! - EMBER_SCHEMA_INVALID (REJECT) - declaration itself is malformed
//! - EMBER_SCHEMA_VALIDATION_FAILED (REJECT) - record violates the declaration

use std::fmt;

/// Schema-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Field declaration is malformed (duplicate name, empty name)
    EmberSchemaInvalid,
    /// Record violates the declared schema
    EmberSchemaValidationFailed,
}

impl SchemaErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::EmberSchemaInvalid => "EMBER_SCHEMA_INVALID",
            SchemaErrorCode::EmberSchemaValidationFailed => "EMBER_SCHEMA_VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Validation failure details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDetails {
    /// Field name
    pub field: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::new(field, "declared field", "undeclared field present")
    }
}

/// Schema error with optional validation details
#[derive(Debug, Clone)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    details: Option<ValidationDetails>,
}

impl SchemaError {
    /// Create an invalid-declaration error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: SchemaErrorCode::EmberSchemaInvalid,
            message: message.into(),
            details: None,
        }
    }

    /// Create a validation failure with details
    pub fn validation_failed(details: ValidationDetails) -> Self {
        Self {
            code: SchemaErrorCode::EmberSchemaValidationFailed,
            message: format!("Record does not match schema at field '{}'", details.field),
            details: Some(details),
        }
    }

    /// Create a validation failure for a non-object record
    pub fn not_an_object(actual: &str) -> Self {
        Self {
            code: SchemaErrorCode::EmberSchemaValidationFailed,
            message: format!("Record must be a JSON object, got {}", actual),
            details: None,
        }
    }

    pub fn code(&self) -> SchemaErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&ValidationDetails> {
        self.details.as_ref()
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REJECT] {}: {}", self.code.code(), self.message)?;
        if let Some(ref d) = self.details {
            write!(f, " (expected {}, got {})", d.expected, d.actual)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
