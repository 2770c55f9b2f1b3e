//! Core types and error definitions for Pairgate.
//!
//! This crate provides the foundational types shared across all Pairgate
//! crates: the error taxonomy surfaced to the HTTP gateway and the
//! identifiers that key sessions and chats.
//!
//! # Main types
//!
//! - [`PairgateError`]: Unified error enum for all Pairgate subsystems.
//! - [`PairgateResult`]: Convenience alias for `Result<T, PairgateError>`.
//! - [`SessionId`]: Validated session identifier, also used as a directory name.
//! - [`ChatId`]: Normalized chat identifier understood by the transport.

/// Session and chat identifiers.
pub mod id;

pub use id::{ChatId, SessionId, CONTACT_SUFFIX};

use std::time::Duration;

// --- Error types ---

/// Top-level error type for Pairgate.
///
/// The first four variants form the taxonomy the gateway maps onto HTTP
/// status codes; the rest wrap lower-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PairgateError {
    /// The referenced session is not in the registry.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Request data was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The authentication wait exceeded its bound.
    #[error("Timed out after {0:?} waiting for authentication")]
    Timeout(Duration),

    /// The underlying transport failed to connect or send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`PairgateError`].
pub type PairgateResult<T> = Result<T, PairgateError>;

impl PairgateError {
    /// Short machine-readable label for the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Config(_) => "config",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }
}
