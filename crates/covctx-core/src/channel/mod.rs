//! Context channels
//!
//! A channel carries the current label from the single publisher to any
//! number of readers. Two transports implement it:
//!
//! - [`file`]: an atomically replaced file, read fresh on every query
//! - [`socket`]: local TCP publish/subscribe, cached per reader by a
//!   [`listener`]
//!
//! ```text
//! ContextPublisher ─► dyn ContextChannel ─► FileChannel ──► channel file ──► FileSource
//!                                        └► SocketChannel ─► TCP frames ──► ContextListener
//! ```

pub mod codec;
pub mod file;
pub mod listener;
pub mod socket;

use crate::config::{ContextConfig, TransportKind};
use crate::env;
use crate::error::ChannelError;
use crate::label::ContextLabel;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use file::{FileChannel, FileSource};
pub use listener::{AddressSource, ContextCache, ContextListener};
pub use socket::{SocketChannel, SocketSubscriber};

/// Where a channel lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelIdentity {
    /// Channel file path
    File(PathBuf),
    /// Publisher socket address
    Socket(SocketAddr),
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelIdentity::File(path) => write!(f, "file://{}", path.display()),
            ChannelIdentity::Socket(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Publisher side of a channel
pub trait ContextChannel: Send + fmt::Debug {
    /// Where readers find this channel
    fn identity(&self) -> ChannelIdentity;

    /// Make `label` the current label for every reader
    ///
    /// # Errors
    /// Transport-specific; a failed publish leaves the previous label current.
    fn publish(&mut self, label: &ContextLabel) -> Result<(), ChannelError>;

    /// Tell readers the channel is going away and release its resources
    ///
    /// Idempotent.
    ///
    /// # Errors
    /// Transport-specific.
    fn close(&mut self) -> Result<(), ChannelError>;

    /// Connected readers, for transports that can tell
    fn subscriber_count(&self) -> Option<usize> {
        None
    }
}

/// Reader side of a channel
///
/// Implementations never fail: anything that goes wrong reads as
/// "no context".
pub trait ContextSource: Send + Sync + fmt::Debug {
    /// Label current right now
    fn current(&self) -> ContextLabel;
}

/// Allocate a channel for the configured transport
///
/// # Errors
/// - `ChannelError` if the file or socket cannot be allocated
pub fn open(config: &ContextConfig) -> Result<Box<dyn ContextChannel>, ChannelError> {
    match config.transport {
        TransportKind::File => Ok(Box::new(FileChannel::create(config)?)),
        TransportKind::Socket => Ok(Box::new(SocketChannel::bind(config)?)),
    }
}

/// Reader that only consults the label mirror in the process environment
///
/// Used when no channel is configured or discoverable, e.g. inside the
/// publishing process when environment export is enabled but no transport
/// is wanted on the reader side.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ContextSource for EnvSource {
    fn current(&self) -> ContextLabel {
        env::inherited_label()
    }
}
