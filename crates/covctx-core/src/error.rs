//! Error types for context propagation
//!
//! Provides error handling for:
//! - Label construction (reserved sentinel payloads)
//! - Channel allocation, publishing and wire decoding
//! - Configuration loading

use std::path::PathBuf;

/// Errors constructing a context label
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    /// Label collides with a reserved sentinel payload
    #[error("label '{0}' is reserved for channel control messages")]
    Reserved(String),

    /// Label does not fit in a single channel frame
    #[error("label is {len} bytes, limit is {max}")]
    TooLong {
        /// Label length in bytes
        len: usize,
        /// Largest accepted length
        max: usize,
    },
}

/// Errors on the context channel (file or socket)
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// IO error while operating on the channel
    #[error("io error during {op}: {source}")]
    Io {
        /// Operation that failed
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// IO error on a channel file
    #[error("io error on channel file {path}: {source}")]
    File {
        /// Channel file path
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No local port could be bound within the attempt budget
    #[error("no unused local port could be bound after {attempts} attempts")]
    PortExhausted {
        /// Number of bind attempts made
        attempts: u32,
    },

    /// Channel address could not be parsed
    #[error("invalid channel address: '{0}'")]
    InvalidAddress(String),

    /// Malformed frame received on the socket channel
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Peer closed the channel
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    /// Create IO error for an operation
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }

    /// Create IO error for a channel file
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Create malformed frame error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame(message.into())
    }
}

/// Errors while building a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Unknown transport name
    #[error("unknown transport: '{0}' (expected 'file' or 'socket')")]
    UnknownTransport(String),

    /// TOML document could not be parsed
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Combined context propagation error
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Invalid label
    #[error("label error: {0}")]
    Label(#[from] LabelError),

    /// Channel allocation, publish or receive failure
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for context operations
pub type ContextResult<T> = Result<T, ContextError>;
