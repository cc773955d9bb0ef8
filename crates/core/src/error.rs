//! Error types for the mediation core.
//!
//! Internal fallible operations return [`error_stack::Report`]s over
//! [`MediationError`]. Public bid outcomes never carry these reports; they are
//! folded into the normalized [`FailureReason`] taxonomy through
//! [`IntoFailureReason`].

use derive_more::{Display, Error};

use crate::auction::types::FailureReason;

/// Errors raised inside the mediation core.
#[derive(Debug, Display, Error)]
pub enum MediationError {
    /// Settings could not be loaded or failed validation.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Caller supplied input that cannot be used.
    #[display("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The call exceeded its deadline.
    #[display("Timeout: {message}")]
    Timeout { message: String },

    /// I/O failure below the HTTP layer (DNS, connect, reset).
    #[display("Network error: {message}")]
    Network { message: String },

    /// Any other transport failure that is neither a timeout nor an I/O error.
    #[display("Transport error: {message}")]
    Transport { message: String },

    /// JSON encoding or decoding failed.
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// A foreign caller passed something unusable across the C ABI.
    #[display("FFI error: {message}")]
    Ffi { message: String },
}

/// Maps an error onto the normalized failure taxonomy.
pub trait IntoFailureReason {
    /// The taxonomy value this error surfaces as.
    fn failure_reason(&self) -> FailureReason;
}

impl IntoFailureReason for MediationError {
    fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Timeout { .. } => FailureReason::Timeout,
            Self::Network { .. } => FailureReason::NetworkError,
            Self::InvalidInput { .. } => FailureReason::InvalidPlacement,
            Self::Configuration { .. }
            | Self::Transport { .. }
            | Self::Serialization { .. }
            | Self::Ffi { .. } => FailureReason::Error,
        }
    }
}
