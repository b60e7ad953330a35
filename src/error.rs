//! Error types for Tapedeck

use std::io;
use thiserror::Error;

use crate::cassette::RecordMode;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Errors that can occur in Tapedeck
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage identifier has no prior data
    #[error("Cassette not found: {0}")]
    NotFound(String),

    /// Stored cassette exists but cannot be parsed
    #[error("Invalid cassette format: {0}")]
    Format(String),

    /// `play_response` called for a request with no playable interaction
    #[error("No playable interaction for {method} {uri} in cassette {cassette}")]
    NoMatch {
        /// Request method
        method: String,
        /// Request URI
        uri: String,
        /// Cassette identifier
        cassette: String,
    },

    /// Unmatched request while the cassette is write protected
    #[error(
        "No match for the request {method} {uri} was found. \
         Can't overwrite existing cassette {cassette} in record mode {mode}"
    )]
    UnplayableRequest {
        /// Request method
        method: String,
        /// Request URI
        uri: String,
        /// Cassette identifier
        cassette: String,
        /// Active record mode
        mode: RecordMode,
    },

    /// URL could not be parsed
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Invalid cassette name
    #[error("Invalid cassette name: {0}")]
    InvalidCassetteName(String),

    /// Matcher name not present in the registry
    #[error("Unknown matcher: {0}")]
    UnknownMatcher(String),

    /// Serializer name not present in the registry
    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The real call performed by a transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl TapedeckError {
    /// Whether this error means "no stored cassette", which loads as empty
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
