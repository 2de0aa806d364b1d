//! Runner-side publisher
//!
//! The publisher owns the authoritative current label for a test session.
//!
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//! ```
//!
//! `switch_context` only does something while `Running`; in any other state
//! there is nobody to notify and the call is a silent no-op.

use crate::channel::{self, ChannelIdentity, ContextChannel};
use crate::config::ContextConfig;
use crate::env;
use crate::error::ChannelError;
use crate::label::ContextLabel;
use parking_lot::Mutex;
use std::fmt;

/// Publisher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublisherState {
    /// No channel allocated
    Stopped,
    /// Channel being allocated
    Starting,
    /// Channel live, label changes are published
    Running,
    /// Channel being torn down
    Stopping,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublisherState::Stopped => "stopped",
            PublisherState::Starting => "starting",
            PublisherState::Running => "running",
            PublisherState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: PublisherState,
    channel: Option<Box<dyn ContextChannel>>,
    current: ContextLabel,
}

/// Publishes label changes to every reader of a channel
///
/// All methods take `&self`; the publisher can be shared with hook code and
/// with [`ContextGuard`]s.
pub struct ContextPublisher {
    config: ContextConfig,
    inner: Mutex<Inner>,
}

impl ContextPublisher {
    /// Create a stopped publisher
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: PublisherState::Stopped,
                channel: None,
                current: ContextLabel::none(),
            }),
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PublisherState {
        self.inner.lock().state
    }

    /// Whether the publisher is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PublisherState::Running
    }

    /// Identity of the live channel
    #[must_use]
    pub fn identity(&self) -> Option<ChannelIdentity> {
        self.inner.lock().channel.as_ref().map(|c| c.identity())
    }

    /// Connected readers, when the transport can tell
    #[must_use]
    pub fn subscriber_count(&self) -> Option<usize> {
        self.inner
            .lock()
            .channel
            .as_ref()
            .and_then(|c| c.subscriber_count())
    }

    /// Last label passed to `switch_context` while running
    #[must_use]
    pub fn current(&self) -> ContextLabel {
        self.inner.lock().current.clone()
    }

    /// Allocate the channel and start publishing
    ///
    /// Idempotent: a running publisher keeps its channel. With environment
    /// export enabled the channel identity is written to the process
    /// environment for subprocesses to inherit.
    ///
    /// # Errors
    /// - `ChannelError` if the channel cannot be allocated; the publisher
    ///   stays stopped
    pub fn start(&self) -> Result<ChannelIdentity, ChannelError> {
        let mut inner = self.inner.lock();
        if let Some(channel) = inner.channel.as_ref() {
            return Ok(channel.identity());
        }

        inner.state = PublisherState::Starting;
        tracing::debug!("Starting context publisher ({})", self.config.transport);

        let channel = match channel::open(&self.config) {
            Ok(channel) => channel,
            Err(e) => {
                inner.state = PublisherState::Stopped;
                tracing::error!("Unable to allocate context channel: {}", e);
                return Err(e);
            }
        };

        let identity = channel.identity();
        if self.config.export_env {
            match &identity {
                ChannelIdentity::File(path) => env::export_file_path(path),
                ChannelIdentity::Socket(addr) => env::export_address(*addr),
            }
            env::mirror_label(&ContextLabel::none());
        }

        inner.channel = Some(channel);
        inner.current = ContextLabel::none();
        inner.state = PublisherState::Running;
        tracing::info!("Context publisher running on {}", identity);

        Ok(identity)
    }

    /// Publish a new label
    ///
    /// The environment mirror is updated before the cross-process publish.
    /// A no-op unless running.
    ///
    /// # Errors
    /// - `ChannelError` if the transport failed to publish; the failure is
    ///   also logged
    pub fn switch_context(&self, label: ContextLabel) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        if inner.state != PublisherState::Running {
            tracing::trace!("Ignoring context switch to {} while {}", label, inner.state);
            return Ok(());
        }

        if label.is_none() {
            tracing::debug!("Resetting context");
        } else {
            tracing::debug!("Switching context to: {}", label);
        }

        if self.config.export_env {
            env::mirror_label(&label);
        }

        let result = match inner.channel.as_mut() {
            Some(channel) => channel.publish(&label),
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::warn!("Failed to publish context {}: {}", label, e);
        }
        inner.current = label;
        result
    }

    /// Set `label` and get a guard that resets to "no context" when dropped
    ///
    /// The reset happens on every exit path, including unwinding.
    #[must_use = "the context is reset as soon as the guard is dropped"]
    pub fn scoped(&self, label: ContextLabel) -> ContextGuard<'_> {
        // Failures are already logged; a broken channel must not fail the phase.
        let _ = self.switch_context(label);
        ContextGuard { publisher: self }
    }

    /// Stop publishing and release the channel
    ///
    /// Readers are told the channel is going away before the resource
    /// disappears. Idempotent.
    ///
    /// # Errors
    /// - `ChannelError` if the channel could not be released cleanly; the
    ///   publisher is stopped regardless
    pub fn stop(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        let Some(mut channel) = inner.channel.take() else {
            return Ok(());
        };

        inner.state = PublisherState::Stopping;
        let identity = channel.identity();
        tracing::debug!("Stopping context publisher on {}", identity);

        let result = channel.close();
        if self.config.export_env {
            env::clear_exports();
        }

        inner.current = ContextLabel::none();
        inner.state = PublisherState::Stopped;
        match &result {
            Ok(()) => tracing::info!("Context publisher on {} stopped", identity),
            Err(e) => tracing::warn!("Context channel {} not released cleanly: {}", identity, e),
        }
        result
    }
}

impl fmt::Debug for ContextPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPublisher")
            .field("transport", &self.config.transport)
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish()
    }
}

impl Default for ContextPublisher {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl Drop for ContextPublisher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Resets the publisher to "no context" when dropped
#[derive(Debug)]
pub struct ContextGuard<'a> {
    publisher: &'a ContextPublisher,
}

impl ContextGuard<'_> {
    /// Publisher this guard resets
    #[inline]
    #[must_use]
    pub fn publisher(&self) -> &ContextPublisher {
        self.publisher
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let _ = self.publisher.switch_context(ContextLabel::none());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::file;
    use crate::config::TransportKind;
    use tempfile::tempdir;

    fn label(text: &str) -> ContextLabel {
        ContextLabel::new(text).unwrap()
    }

    fn file_publisher(dir: &std::path::Path) -> ContextPublisher {
        ContextPublisher::new(
            ContextConfig::new()
                .with_export_env(false)
                .with_file_dir(dir),
        )
    }

    fn channel_path(publisher: &ContextPublisher) -> std::path::PathBuf {
        match publisher.identity() {
            Some(ChannelIdentity::File(path)) => path,
            other => panic!("expected file channel, got {other:?}"),
        }
    }

    #[test]
    fn lifecycle_states() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        assert_eq!(publisher.state(), PublisherState::Stopped);

        publisher.start().unwrap();
        assert_eq!(publisher.state(), PublisherState::Running);

        publisher.stop().unwrap();
        assert_eq!(publisher.state(), PublisherState::Stopped);
        assert!(publisher.identity().is_none());
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());

        let first = publisher.start().unwrap();
        let second = publisher.start().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stop_is_idempotent_and_removes_file() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        publisher.start().unwrap();
        let path = channel_path(&publisher);

        publisher.stop().unwrap();
        publisher.stop().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn switch_while_stopped_is_noop() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        publisher.switch_context(label("collection")).unwrap();
        assert!(publisher.current().is_none());
        assert_eq!(publisher.state(), PublisherState::Stopped);
    }

    #[test]
    fn switch_and_clear_reach_the_file() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        publisher.start().unwrap();
        let path = channel_path(&publisher);

        publisher.switch_context(label("test_x|setup")).unwrap();
        assert_eq!(file::read(&path), label("test_x|setup"));

        publisher.switch_context(ContextLabel::none()).unwrap();
        assert!(file::read(&path).is_none());
    }

    #[test]
    fn guard_resets_on_drop() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        publisher.start().unwrap();
        let path = channel_path(&publisher);

        {
            let _guard = publisher.scoped(label("test_x|call"));
            assert_eq!(file::read(&path), label("test_x|call"));
        }
        assert!(file::read(&path).is_none());
        assert!(publisher.current().is_none());
    }

    #[test]
    fn guard_resets_on_panic() {
        let dir = tempdir().unwrap();
        let publisher = file_publisher(dir.path());
        publisher.start().unwrap();
        let path = channel_path(&publisher);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = publisher.scoped(label("test_x|teardown"));
            panic!("phase failed");
        }));

        assert!(outcome.is_err());
        assert!(file::read(&path).is_none());
    }

    #[test]
    fn drop_stops_publisher() {
        let dir = tempdir().unwrap();
        let path = {
            let publisher = file_publisher(dir.path());
            publisher.start().unwrap();
            channel_path(&publisher)
        };
        assert!(!path.exists());
    }

    #[test]
    fn socket_publisher_reports_address() {
        let publisher = ContextPublisher::new(
            ContextConfig::new()
                .with_transport(TransportKind::Socket)
                .with_export_env(false),
        );
        let identity = publisher.start().unwrap();
        assert!(matches!(identity, ChannelIdentity::Socket(addr) if addr.ip().is_loopback()));
        publisher.stop().unwrap();
    }

    #[test]
    fn failed_start_stays_stopped() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does/not/exist");
        let publisher = ContextPublisher::new(
            ContextConfig::new()
                .with_export_env(false)
                .with_file_dir(&missing),
        );

        assert!(publisher.start().is_err());
        assert_eq!(publisher.state(), PublisherState::Stopped);
    }
}
