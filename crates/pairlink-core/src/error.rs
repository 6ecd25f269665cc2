//! Error types for Pairlink.
//!
//! Crate-specific errors (store, capability, rendering) convert into
//! [`Error`] so the binary can report them uniformly, together with a
//! recovery suggestion where one exists.

use thiserror::Error;

/// Result type alias using Pairlink's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Pairlink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session persistence error
    #[error("Session error: {0}")]
    Session(String),

    /// Messaging capability error
    #[error("Capability error: {0}")]
    Capability(String),

    /// Pairing artifact could not be rendered
    #[error("Render error: {0}")]
    Render(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check ./pairlink.toml or run 'pairlink config path'"),
            Error::Session(_) => Some("Run 'pairlink session clear' and pair the account again"),
            Error::Capability(_) => Some("Check that the messaging bridge command is installed and runs"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_message() {
        let err = Error::Render("data too long".to_string());
        assert_eq!(err.to_string(), "Render error: data too long");
        assert!(err.recovery_suggestion().is_none());
    }

    #[test]
    fn test_capability_suggests_checking_bridge() {
        let err = Error::Capability("spawn failed".to_string());
        assert!(err.recovery_suggestion().unwrap().contains("bridge"));
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Session("record unreadable".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.contains("record unreadable"));
        assert!(formatted.contains("Suggestion:"));
    }

    #[test]
    fn test_internal_has_no_suggestion() {
        assert!(Error::Internal("x".to_string()).recovery_suggestion().is_none());
    }
}
