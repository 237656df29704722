//! Error types for the Turnstile limiter.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Lockout decisions are never errors; they are reported through
/// [`Evaluation`](crate::lockout::Evaluation).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// A policy field was zero. Only raised while constructing a limiter.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The identity key was empty or whitespace only.
    #[error("Invalid key: identity key must not be blank")]
    InvalidKey,

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed attempt record in driver input
    #[error("Parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
