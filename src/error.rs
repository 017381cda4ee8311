//! Error types for the Prodigy driver core.
//!
//! `ProdigyError` consolidates the error taxonomy the driver surfaces: transport
//! failures, protocol framing/semantics, spectrum validation, and acquisition-level
//! conditions. Low-level errors travel up as this single typed value until the
//! acquisition orchestrator decides the session outcome.

use thiserror::Error;

/// Convenience alias for results using the driver's error type.
pub type DriverResult<T> = std::result::Result<T, ProdigyError>;

#[derive(Error, Debug)]
pub enum ProdigyError {
    #[error("cannot reach Prodigy server at {host}:{port}: {source}")]
    ConnectionUnavailable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out after {0:?}")]
    TransportTimeout(std::time::Duration),

    #[error("connection lost mid-exchange")]
    TransportLost,

    #[error("malformed reply line: {0:?}")]
    ProtocolFraming(String),

    #[error("reply id {got} did not match request id {expected} (stale reply discarded)")]
    ProtocolMismatchedId { expected: String, got: String },

    #[error("server error {code}: {message}")]
    ProtocolServerError { code: u16, message: String },

    #[error("Prodigy server reported protocol version {major}.{minor}, only major version 1 is supported")]
    ProtocolVersionMismatch { major: u32, minor: u32 },

    #[error("spectrum validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("short read: expected {expected} values, got {got}")]
    AcquisitionShort { expected: usize, got: usize },

    #[error("cannot set parameter while acquisition is running or paused")]
    AcquisitionBusy,

    #[error("acquisition aborted by user")]
    UserAborted,

    #[error("unknown analyzer parameter: {0:?}")]
    UnknownParameter(String),

    #[error("type mismatch for parameter {name:?}: expected {expected}, got {got}")]
    ParameterTypeMismatch {
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Elapsed(#[from] tokio::time::error::Elapsed),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_server_error_display() {
        let err = ProdigyError::ProtocolServerError {
            code: 201,
            message: "spectrum not validated".to_string(),
        };
        assert_eq!(err.to_string(), "server error 201: spectrum not validated");
    }

    #[test]
    fn test_acquisition_short_display() {
        let err = ProdigyError::AcquisitionShort {
            expected: 21,
            got: 10,
        };
        assert_eq!(err.to_string(), "short read: expected 21 values, got 10");
    }

    #[test]
    fn test_mismatched_id_display() {
        let err = ProdigyError::ProtocolMismatchedId {
            expected: "0001".to_string(),
            got: "0002".to_string(),
        };
        assert!(err.to_string().contains("stale reply discarded"));
    }
}
