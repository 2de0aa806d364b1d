//! Coverage-engine side reader
//!
//! The coverage engine asks for the current label once per traced frame, so
//! [`ContextReader::current`] is synchronous, cheap and infallible.

use crate::channel::{AddressSource, ContextListener, ContextSource, EnvSource, FileSource};
use crate::config::{ContextConfig, TransportKind};
use crate::env;
use crate::label::ContextLabel;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

static GLOBAL: OnceCell<ContextReader> = OnceCell::new();

/// Answers "what is the current label?"
#[derive(Debug, Clone)]
pub struct ContextReader {
    source: Arc<dyn ContextSource>,
}

impl ContextReader {
    /// Reader for an explicit configuration
    ///
    /// - File transport with a path: reads that file on every call.
    /// - Socket transport: spawns a listener for `config.address`, or one that
    ///   polls the environment for the address when none is configured. The
    ///   cache starts at the label inherited through the environment.
    /// - Anything else: the environment label mirror.
    ///
    /// A listener that cannot be spawned degrades to the environment mirror.
    #[must_use]
    pub fn new(config: &ContextConfig) -> Self {
        let source: Arc<dyn ContextSource> = match (config.transport, &config.file_path) {
            (TransportKind::File, Some(path)) => Arc::new(FileSource::new(path)),
            (TransportKind::Socket, _) => {
                let address = config
                    .address
                    .map_or(AddressSource::Environment, AddressSource::Fixed);
                match ContextListener::spawn(address, env::inherited_label(), config.poll_interval()) {
                    Ok(listener) => Arc::new(listener),
                    Err(e) => {
                        tracing::warn!("Context listener unavailable, using environment: {}", e);
                        Arc::new(EnvSource)
                    }
                }
            }
            (TransportKind::File, None) => Arc::new(EnvSource),
        };
        Self { source }
    }

    /// Reader configured from the process environment
    ///
    /// A file path in the environment wins, then an address. When neither
    /// is set yet, as in a test runner whose publisher starts later, the
    /// environment is checked again on every call: the label mirror answers
    /// until a channel appears, and from then on the channel does. An
    /// invalid transport variable is ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let config = ContextConfig::from_env().unwrap_or_else(|e| {
            tracing::debug!("Ignoring context configuration from environment: {}", e);
            ContextConfig::default()
        });
        if config.file_path.is_some() || config.address.is_some() {
            return Self::new(&config);
        }
        Self {
            source: Arc::new(DiscoveredSource::new(config.poll_interval())),
        }
    }

    /// Reader over an arbitrary source
    #[must_use]
    pub fn with_source(source: Arc<dyn ContextSource>) -> Self {
        Self { source }
    }

    /// Process-wide reader, built from the environment on first use
    ///
    /// At most one listener thread is spawned per process through this
    /// reader.
    #[must_use]
    pub fn global() -> &'static ContextReader {
        GLOBAL.get_or_init(ContextReader::from_env)
    }

    /// Label current right now; never fails
    #[inline]
    #[must_use]
    pub fn current(&self) -> ContextLabel {
        self.source.current()
    }

    /// Label for the frame being traced, `None` for "no context"
    ///
    /// Entry point for the coverage engine's dynamic-context hook.
    #[must_use]
    pub fn dynamic_context(&self) -> Option<String> {
        self.current().to_option()
    }
}

/// Source that waits for a channel to be announced in the environment
///
/// Resolution happens at most once; the label mirror stands in until then.
#[derive(Debug)]
struct DiscoveredSource {
    resolved: OnceCell<Arc<dyn ContextSource>>,
    poll_interval: Duration,
}

impl DiscoveredSource {
    fn new(poll_interval: Duration) -> Self {
        Self {
            resolved: OnceCell::new(),
            poll_interval,
        }
    }

    fn resolve(&self) -> Option<&Arc<dyn ContextSource>> {
        self.resolved
            .get_or_try_init(|| {
                if let Some(path) = env::file_path() {
                    tracing::debug!("Discovered context file {}", path.display());
                    return Ok(Arc::new(FileSource::new(path)) as Arc<dyn ContextSource>);
                }
                let Some(address) = env::address() else {
                    return Err(());
                };
                tracing::debug!("Discovered context publisher at {}", address);
                ContextListener::spawn(
                    AddressSource::Fixed(address),
                    env::inherited_label(),
                    self.poll_interval,
                )
                .map(|listener| Arc::new(listener) as Arc<dyn ContextSource>)
                .map_err(|e| tracing::warn!("Context listener unavailable: {}", e))
            })
            .ok()
    }
}

impl ContextSource for DiscoveredSource {
    fn current(&self) -> ContextLabel {
        match self.resolve() {
            Some(source) => source.current(),
            None => env::inherited_label(),
        }
    }
}
