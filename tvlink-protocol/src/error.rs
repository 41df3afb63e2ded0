//! Error handling for the TV link protocol
//!
//! This module provides a single error type for all protocol operations.
//! Errors are automatically converted from underlying library errors using `thiserror`.
//!
//! ## Error Categories
//!
//! ### Validation Errors
//! Local, non-fatal input problems (device name, IP address, pairing code).
//! The device machine records them as a field-specific message and stays put.
//!
//! ### Protocol Errors
//! Malformed or unexpected wire data: bad varints, unknown envelopes,
//! undecodable message bodies, non-OK pairing status codes.
//!
//! ### Transport Errors
//! Socket and TLS failures, including timeouts. Fatal to the session instance
//! that hit them; surfaced to the device machine as exactly one
//! `CONNECTION_LOST` or `PAIRING_ERROR` event.
//!
//! ### Policy Errors
//! `ExhaustedRetries` is raised once the retry ceiling is reached and drives the
//! device machine into its top-level error state.
//!
//! ```rust
//! use tvlink_protocol::ProtocolError;
//!
//! let error = ProtocolError::Timeout("pairing request ack".to_string());
//! assert!(error.is_transport());
//!
//! let error = ProtocolError::Verification("check byte mismatch".to_string());
//! assert!(!error.is_transport());
//! ```

use crate::codec::VarintError;
use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (socket, file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS handshake or stream error
    #[error("TLS error: {0}")]
    Tls(#[from] openssl::ssl::Error),

    /// Certificate generation, parsing or key handling error
    #[error("Certificate error: {0}")]
    Certificate(#[from] openssl::error::ErrorStack),

    /// Malformed varint on the wire
    #[error("Varint error: {0}")]
    Varint(#[from] VarintError),

    /// Message body could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Local input rejected before anything touched the network
    #[error("{message}")]
    Validation {
        /// Which input was rejected (`name`, `ip`, `code`)
        field: &'static str,
        /// Human readable message
        message: String,
    },

    /// Invalid or unexpected message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The device answered with a non-OK status code
    #[error("Device reported status {0}")]
    BadStatus(u32),

    /// A blocking step did not complete in time; names the stalled phase
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Pairing code did not match the computed secret
    #[error("Verification failed: {0}")]
    Verification(String),

    /// The connection closed before the operation could finish
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Retry ceiling reached
    #[error("Gave up after {0} attempts")]
    ExhaustedRetries(u32),

    /// Command issued before the session finished its configure exchange
    #[error("Session not ready")]
    NotReady,

    /// Command issued to a session or pairing that has been torn down
    #[error("Session disposed")]
    Disposed,
}

impl ProtocolError {
    /// Build a validation error for a named field
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ProtocolError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Whether this error belongs to the transport class
    ///
    /// Transport errors are fatal to the session instance that produced them.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Tls(_)
                | ProtocolError::Timeout(_)
                | ProtocolError::ConnectionClosed(_)
        )
    }

    /// Convert a generic I/O error, keeping timeouts distinguishable
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(context.to_string()),
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => {
                ProtocolError::ConnectionClosed(format!("{}: {}", context, error))
            }
            _ => ProtocolError::Io(error),
        }
    }
}
