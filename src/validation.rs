//! Field-level validation for inbound transaction submissions.
//!
//! Validation collects every violated constraint instead of stopping at the
//! first one, so API callers get the full list in a single response.

use serde::Serialize;
use thiserror::Error;

/// Length of a transaction hash in hex digits (32 bytes).
pub const TX_HASH_HEX_DIGITS: usize = 64;

/// Length of an account address in hex digits (20 bytes).
pub const ADDRESS_HEX_DIGITS: usize = 40;

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

/// Every constraint a submission violated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("invalid transaction: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Whether the given field is among the violations
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates violations while checking a submission field by field.
#[derive(Debug, Default)]
pub struct Validator {
    violations: Vec<FieldViolation>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn reject(&mut self, field: &'static str, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field,
            message: message.into(),
        });
    }

    /// `0x` followed by exactly `digits` hexadecimal characters.
    pub fn prefixed_hex(&mut self, field: &'static str, value: &str, digits: usize) {
        let Some(body) = value.strip_prefix("0x") else {
            self.reject(field, "must start with 0x");
            return;
        };
        if body.len() != digits {
            self.reject(
                field,
                format!("must have {} hex digits after 0x, got {}", digits, body.len()),
            );
            return;
        }
        if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            self.reject(field, "must contain only hexadecimal characters");
        }
    }

    pub fn non_negative(&mut self, field: &'static str, value: f64) {
        if !value.is_finite() {
            self.reject(field, "must be a finite number");
        } else if value < 0.0 {
            self.reject(field, "must be greater than or equal to 0");
        }
    }

    pub fn positive(&mut self, field: &'static str, value: i64) {
        if value <= 0 {
            self.reject(field, "must be greater than 0");
        }
    }

    /// Finish validation, returning every collected violation.
    pub fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.violations,
            })
        }
    }
}
