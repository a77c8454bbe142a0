//! Account payloads.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::{WriteInput, invalid, require_text, trim_in_place};

/// Minimum password length.
pub const PASSWORD_MIN_LEN: usize = 8;

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        return Err(invalid(format!("'{email}' is not a valid email address")));
    }
    Ok(())
}

fn validate_password(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(invalid(format!(
            "a password must have at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(invalid("passwords are not the same"));
    }
    Ok(())
}

/// Body of a signup. The role is always `user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupInput {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    pub password: String,
    pub password_confirm: String,
}

impl WriteInput for SignupInput {
    fn normalize(&mut self) {
        trim_in_place(&mut self.name);
        self.email = self.email.trim().to_lowercase();
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        validate_email(&self.email)?;
        validate_password(&self.password, &self.password_confirm)
    }
}

/// Self-service profile update: only `name` and `email`.
///
/// Other fields are silently ignored, but password fields are rejected so
/// a client cannot believe a password change succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "password", skip_serializing)]
    password: Option<serde_json::Value>,
    #[serde(default, rename = "passwordConfirm", skip_serializing)]
    password_confirm: Option<serde_json::Value>,
}

impl WriteInput for UpdateMe {
    fn normalize(&mut self) {
        if let Some(name) = self.name.as_mut() {
            trim_in_place(name);
        }
        if let Some(email) = self.email.as_mut() {
            *email = email.trim().to_lowercase();
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.password.is_some() || self.password_confirm.is_some() {
            return Err(invalid(
                "this route is not for password updates; use /reset-password",
            ));
        }
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

/// Body of a login.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl LoginInput {
    /// Both credentials, or a validation error naming what is missing.
    pub fn credentials(&self) -> Result<(String, &str), ValidationError> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Ok((email.trim().to_lowercase(), password.as_str()))
            }
            _ => Err(invalid("please provide email and password")),
        }
    }
}

/// Body of a password reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordInput {
    pub password: String,
    pub password_confirm: String,
}

impl WriteInput for ResetPasswordInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_password(&self.password, &self.password_confirm)
    }
}

/// Body of a signed-in password change. The current password is checked
/// by the caller and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    #[serde(skip_serializing)]
    password_current: String,
    pub password: String,
    pub password_confirm: String,
}

impl ChangePasswordInput {
    pub fn current(&self) -> &str {
        &self.password_current
    }
}

impl WriteInput for ChangePasswordInput {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.password_current.is_empty() {
            return Err(invalid("please provide your current password"));
        }
        validate_password(&self.password, &self.password_confirm)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signup_normalizes_email() {
        let map = SignupInput::from_body(json!({
            "name": "Jonas",
            "email": " Jonas@Example.COM ",
            "password": "pass1234",
            "passwordConfirm": "pass1234"
        }))
        .unwrap();
        assert_eq!(map["email"], json!("jonas@example.com"));
        assert!(!map.contains_key("role"));
    }

    #[test]
    fn signup_checks_passwords() {
        let body = |pw: &str, confirm: &str| {
            json!({ "name": "a", "email": "a@b.io", "password": pw, "passwordConfirm": confirm })
        };
        assert!(SignupInput::from_body(body("short", "short")).is_err());
        assert!(SignupInput::from_body(body("pass1234", "pass4321")).is_err());
        assert!(SignupInput::from_body(body("pass1234", "pass1234")).is_ok());
    }

    #[test]
    fn signup_rejects_bad_email() {
        let body = json!({
            "name": "a", "email": "not-an-email",
            "password": "pass1234", "passwordConfirm": "pass1234"
        });
        assert!(SignupInput::from_body(body).is_err());
    }

    #[test]
    fn update_me_filters_fields() {
        let map = UpdateMe::from_body(json!({ "name": "New", "role": "admin" })).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["name"], json!("New"));
    }

    #[test]
    fn update_me_rejects_passwords() {
        let err = UpdateMe::from_body(json!({ "password": "x" })).unwrap_err();
        assert!(err.to_string().contains("password"));
        assert!(UpdateMe::from_body(json!({ "passwordConfirm": "x" })).is_err());
    }

    #[test]
    fn current_password_is_not_persisted() {
        let body = json!({
            "passwordCurrent": "old-pass-1",
            "password": "new-pass-1",
            "passwordConfirm": "new-pass-1"
        });
        let input: ChangePasswordInput = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(input.current(), "old-pass-1");
        let map = ChangePasswordInput::from_body(body).unwrap();
        assert!(!map.contains_key("passwordCurrent"));
        assert_eq!(map["password"], json!("new-pass-1"));
    }

    #[test]
    fn login_requires_both_fields() {
        let input: LoginInput = serde_json::from_value(json!({ "email": "a@b.io" })).unwrap();
        assert!(input.credentials().is_err());
        let input: LoginInput =
            serde_json::from_value(json!({ "email": "A@b.io", "password": "x" })).unwrap();
        assert_eq!(input.credentials().unwrap(), ("a@b.io".to_string(), "x"));
    }
}
