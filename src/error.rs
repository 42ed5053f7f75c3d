//! Controller error types.
//!
//! All failures in the `metalcsi` crate are represented by the
//! [`ControllerError`] enum, which derives [`thiserror::Error`] and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel inside the
//! RPC envelope back to the orchestrator.  [`Code`] gives each error its
//! gRPC-style status code at the request surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// gRPC-style status codes surfaced at the RPC boundary.
///
/// Only the codes this controller actually returns are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The operation was aborted; the underlying work may still continue.
    Aborted = 10,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
}

impl Code {
    /// Get a human-readable description of this code.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Code::Ok => "The operation completed successfully",
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::ResourceExhausted => "Some resource has been exhausted",
            Code::Aborted => "The operation was aborted",
            Code::Unimplemented => "Operation is not implemented or not supported",
            Code::Internal => "Internal error",
        }
    }
}

/// Unified error type for controller operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum ControllerError {
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free disk on any node can satisfy the request.
    #[error("there is no suitable drive for request {0}")]
    NoCapacity(String),

    /// The operation could not be resolved in time; the underlying work
    /// continues and the caller may retry.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The object store returned an error.
    #[error("store error: {0}")]
    Store(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested surface is outside this controller's scope.
    #[error("{0} is not implemented")]
    Unimplemented(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Create a [`ControllerError::Store`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn store<E: std::fmt::Display>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Create a [`ControllerError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`ControllerError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// The status code this error maps to at the RPC boundary.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NoCapacity(_) => Code::ResourceExhausted,
            Self::Aborted(_) => Code::Aborted,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Store(_) | Self::Transport(_) | Self::Internal(_) => Code::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ControllerError::NoCapacity("vol-123".into());
        assert_eq!(err.to_string(), "there is no suitable drive for request vol-123");
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            ControllerError::InvalidArgument("x".into()).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            ControllerError::NoCapacity("x".into()).code(),
            Code::ResourceExhausted
        );
        assert_eq!(ControllerError::Aborted("x".into()).code(), Code::Aborted);
        assert_eq!(ControllerError::Store("x".into()).code(), Code::Internal);
        assert_eq!(
            ControllerError::Unimplemented("ListVolumes".into()).code(),
            Code::Unimplemented
        );
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = ControllerError::Transport("connection reset".into());
        let json = serde_json::to_string(&err).expect("serialize");
        let de: ControllerError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }
}
