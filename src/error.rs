//! Error types for the RFB session engine.

use std::io;
use thiserror::Error;

/// Result type for RFB operations.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Errors that can terminate an RFB session.
#[derive(Debug, Error)]
pub enum RfbError {
    /// I/O error on the underlying stream. Always fatal for the session.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client violated the RFB protocol during handshake or dispatch.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client failed the DES password challenge.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// A rectangle could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The client closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
}
