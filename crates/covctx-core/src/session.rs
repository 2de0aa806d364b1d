//! Test-runner hook wiring
//!
//! Maps the runner's lifecycle notifications onto publisher calls. For a test
//! node `N` the labels are `N|start`, `N|setup`, `N|call`, `N|teardown` and
//! `N|finish`; collection publishes `collection`.
//!
//! Every hook resets to "no context" on the way out, whether the wrapped
//! phase returned normally or not.

use crate::channel::ChannelIdentity;
use crate::config::ContextConfig;
use crate::error::ChannelError;
use crate::label::{ContextLabel, TestPhase};
use crate::publisher::{ContextGuard, ContextPublisher};

/// Name the plugin registers under with the test runner
pub const PLUGIN_NAME: &str = "coverage-context-plugin";

/// Test-runner plugin publishing per-phase labels
#[derive(Debug, Default)]
pub struct CoverageContextPlugin {
    publisher: ContextPublisher,
}

impl CoverageContextPlugin {
    /// Create plugin with configuration
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            publisher: ContextPublisher::new(config),
        }
    }

    /// Underlying publisher
    #[inline]
    #[must_use]
    pub fn publisher(&self) -> &ContextPublisher {
        &self.publisher
    }

    /// Session start: allocate the channel
    ///
    /// # Errors
    /// - `ChannelError` if the channel cannot be allocated; instrumentation
    ///   setup should be aborted
    pub fn session_start(&self) -> Result<ChannelIdentity, ChannelError> {
        self.publisher.start()
    }

    /// Session finish: tell readers and release the channel
    ///
    /// # Errors
    /// - `ChannelError` if the channel was not released cleanly
    pub fn session_finish(&self) -> Result<(), ChannelError> {
        self.publisher.stop()
    }

    /// Enter the collection phase
    #[must_use = "the context is reset as soon as the guard is dropped"]
    pub fn collection(&self) -> ContextGuard<'_> {
        self.publisher.scoped(ContextLabel::collection())
    }

    /// Enter `phase` of test `node_id`
    #[must_use = "the context is reset as soon as the guard is dropped"]
    pub fn phase(&self, node_id: &str, phase: TestPhase) -> ContextGuard<'_> {
        self.publisher.scoped(ContextLabel::phase(node_id, phase))
    }

    /// Run collection inside its context
    pub fn wrap_collection<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.collection();
        f()
    }

    /// Run `phase` of test `node_id` inside its context
    pub fn wrap_phase<R>(&self, node_id: &str, phase: TestPhase, f: impl FnOnce() -> R) -> R {
        let _guard = self.phase(node_id, phase);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::file;
    use tempfile::tempdir;

    fn plugin(dir: &std::path::Path) -> CoverageContextPlugin {
        CoverageContextPlugin::new(
            ContextConfig::new()
                .with_export_env(false)
                .with_file_dir(dir),
        )
    }

    fn path_of(identity: ChannelIdentity) -> std::path::PathBuf {
        match identity {
            ChannelIdentity::File(path) => path,
            ChannelIdentity::Socket(addr) => panic!("unexpected socket {addr}"),
        }
    }

    #[test]
    fn full_item_protocol() {
        let dir = tempdir().unwrap();
        let plugin = plugin(dir.path());
        let path = path_of(plugin.session_start().unwrap());
        let node = "tests/test_foo.py::test_bar";

        let seen = plugin.wrap_collection(|| file::read(&path));
        assert_eq!(seen.as_str(), Some("collection"));
        assert!(file::read(&path).is_none());

        for phase in TestPhase::ALL {
            let seen = plugin.wrap_phase(node, phase, || file::read(&path));
            assert_eq!(seen, ContextLabel::phase(node, phase));
            assert!(file::read(&path).is_none());
        }

        plugin.session_finish().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn failing_phase_still_clears() {
        let dir = tempdir().unwrap();
        let plugin = plugin(dir.path());
        let path = path_of(plugin.session_start().unwrap());

        let result: Result<(), &str> =
            plugin.wrap_phase("test_x", TestPhase::Setup, || Err("fixture error"));

        assert!(result.is_err());
        assert!(file::read(&path).is_none());
    }

    #[test]
    fn hooks_before_session_start_are_harmless() {
        let dir = tempdir().unwrap();
        let plugin = plugin(dir.path());
        let value = plugin.wrap_phase("test_x", TestPhase::Call, || 7);
        assert_eq!(value, 7);
        plugin.session_finish().unwrap();
    }
}
