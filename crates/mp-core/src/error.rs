//! Core error types for Manufacturing Portal RS
//!
//! Every failure that can come back from the portal REST API is folded into
//! [`PortalError`]. Client-side validation problems are collected in
//! [`ValidationErrors`] so a whole batch can be reported at once.

use std::collections::BTreeMap;
use thiserror::Error;

/// Message used when the server gave no usable error text.
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Core error type for all portal operations
#[derive(Error, Debug, Clone)]
pub enum PortalError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Map an HTTP status and server-provided message onto the taxonomy.
    ///
    /// An empty message is replaced by [`GENERIC_FAILURE_MESSAGE`].
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            message
        };

        match status {
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            404 => Self::NotFound {
                entity: "resource",
                field: "message",
                value: message,
            },
            409 => Self::Conflict { message },
            422 => {
                let mut errors = ValidationErrors::new();
                errors.add_base(message);
                Self::Validation(errors)
            }
            _ => Self::Transport {
                status: Some(status),
                message,
            },
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            PortalError::NotFound { .. } => Some(404),
            PortalError::Unauthorized { .. } => Some(401),
            PortalError::Forbidden { .. } => Some(403),
            PortalError::Validation(_) => Some(422),
            PortalError::Conflict { .. } => Some(409),
            PortalError::Transport { status, .. } => *status,
            PortalError::Config(_) | PortalError::Internal(_) => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PortalError::NotFound { .. } => "not_found",
            PortalError::Unauthorized { .. } => "unauthorized",
            PortalError::Forbidden { .. } => "forbidden",
            PortalError::Validation(_) => "validation_failed",
            PortalError::Conflict { .. } => "conflict",
            PortalError::Transport { .. } => "transport_error",
            PortalError::Config(_) => "configuration_error",
            PortalError::Internal(_) => "internal_error",
        }
    }

    /// The text shown to an operator: the server's own message when there is
    /// one, without the taxonomy prefix.
    pub fn user_message(&self) -> String {
        match self {
            PortalError::NotFound { value, .. } => value.clone(),
            PortalError::Unauthorized { message }
            | PortalError::Forbidden { message }
            | PortalError::Conflict { message }
            | PortalError::Transport { message, .. } => message.clone(),
            PortalError::Validation(errors) => {
                let messages = errors.full_messages();
                if messages.is_empty() {
                    GENERIC_FAILURE_MESSAGE.to_string()
                } else {
                    messages.join("; ")
                }
            }
            PortalError::Config(message) | PortalError::Internal(message) => message.clone(),
        }
    }
}

/// Validation errors collection, keyed by field (or file) name
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("{}", self.full_messages().join("; "))]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: BTreeMap<String, Vec<String>>,
    /// Base errors not tied to a specific field
    pub base_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.base_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.base_errors.is_empty()
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.errors.get(field)
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
        self.base_errors.extend(other.base_errors);
    }

    /// Base messages first, then `"{field}: {message}"` in field order.
    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = self.base_errors.clone();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{}: {}", field, msg));
            }
        }
        messages
    }
}

impl From<validator::ValidationErrors> for ValidationErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut collected = ValidationErrors::new();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                collected.add(field.to_string(), message);
            }
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            PortalError::from_status(401, "token expired"),
            PortalError::Unauthorized { .. }
        ));
        assert!(matches!(
            PortalError::from_status(403, "nope"),
            PortalError::Forbidden { .. }
        ));
        assert!(matches!(
            PortalError::from_status(409, "exists"),
            PortalError::Conflict { .. }
        ));
        assert!(matches!(
            PortalError::from_status(502, "bad gateway"),
            PortalError::Transport {
                status: Some(502),
                ..
            }
        ));
    }

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = PortalError::from_status(500, "Disk quota exceeded");
        assert_eq!(err.user_message(), "Disk quota exceeded");

        let err = PortalError::from_status(404, "Attachment old.pdf is gone");
        assert_eq!(err.user_message(), "Attachment old.pdf is gone");
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_blank_message_falls_back() {
        let err = PortalError::from_status(500, "   ");
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);

        let err = PortalError::from_status(422, "");
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
        assert_eq!(err.error_code(), "validation_failed");
    }

    #[test]
    fn test_validation_errors_messages() {
        let mut errors = ValidationErrors::new();
        errors.add("b.exe", "Unsupported file type");
        errors.add("a.gbr", "File too large (max 50MB)");
        errors.add_base("2 files rejected");

        assert!(errors.has_error("b.exe"));
        assert_eq!(
            errors.full_messages(),
            vec![
                "2 files rejected".to_string(),
                "a.gbr: File too large (max 50MB)".to_string(),
                "b.exe: Unsupported file type".to_string(),
            ]
        );
    }

    #[test]
    fn test_merge() {
        let mut first = ValidationErrors::new();
        first.add("x.drl", "bad");
        let mut second = ValidationErrors::new();
        second.add("x.drl", "worse");
        second.add_base("base");

        first.merge(second);
        assert_eq!(first.get("x.drl").map(|v| v.len()), Some(2));
        assert_eq!(first.base_errors, vec!["base".to_string()]);
    }
}
