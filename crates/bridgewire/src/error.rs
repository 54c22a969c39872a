//! # Error Definitions
//!
//! Failures of the wire layer itself, as opposed to failures a peer reports
//! inside an outcome.

/// Operational failures while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The bytes were not a well-formed frame.
    Codec(String),
    /// The frame decoded but breaks the protocol (e.g. an outcome with no result slot).
    ProtocolViolation(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(msg) => write!(f, "codec error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for WireError {}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
