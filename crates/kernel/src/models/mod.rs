//! Typed write payloads and their validation.
//!
//! Each input type deserializes from a request body, checks its own rules
//! and renders the field map that is handed to the persist hooks.

pub mod review;
pub mod tour;
pub mod user;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::aggregate::{RATINGS_AVERAGE, RATINGS_QUANTITY};
use crate::error::ValidationError;

pub use review::{CreateReview, UpdateReview};
pub use tour::{CreateTour, Difficulty, UpdateTour};
pub use user::{ChangePasswordInput, LoginInput, ResetPasswordInput, SignupInput, UpdateMe};

/// Fields only the aggregate maintainer may write.
pub const DERIVED_FIELDS: [&str; 2] = [RATINGS_QUANTITY, RATINGS_AVERAGE];

/// A validated write payload.
pub trait WriteInput: DeserializeOwned + Serialize {
    /// Canonicalize fields (trim, lowercase) before validation.
    fn normalize(&mut self) {}

    fn validate(&self) -> Result<(), ValidationError>;

    /// Parse, validate and render a request body.
    fn from_body(body: Value) -> Result<Map<String, Value>, ValidationError> {
        if let Some(field) = DERIVED_FIELDS
            .iter()
            .find(|f| body.get(**f).is_some())
        {
            return Err(ValidationError::InvalidDocument(format!(
                "'{field}' is computed from reviews and cannot be set"
            )));
        }
        let mut input: Self = serde_json::from_value(body)
            .map_err(|e| ValidationError::InvalidDocument(e.to_string()))?;
        input.normalize();
        input.validate()?;
        match serde_json::to_value(&input) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(ValidationError::InvalidDocument(
                "body must be a JSON object".to_string(),
            )),
        }
    }
}

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidDocument(message.into())
}

/// Reject a blank required string field.
fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("'{field}' must not be empty")));
    }
    Ok(())
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}
