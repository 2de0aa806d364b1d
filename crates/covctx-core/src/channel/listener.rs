//! Consumer-side socket listener
//!
//! One background thread per reader keeps a [`ContextCache`] current. The
//! tracing hot path only loads the cache; it never touches the network.

use super::codec::Message;
use super::socket::SocketSubscriber;
use super::ContextSource;
use crate::env;
use crate::error::ChannelError;
use crate::label::ContextLabel;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Most recently received label
///
/// Updates replace the whole label with one reference swap, so a reader
/// racing an update sees the old label or the new one.
#[derive(Debug, Default)]
pub struct ContextCache {
    current: ArcSwap<ContextLabel>,
}

impl ContextCache {
    /// Create cache holding `initial`
    #[must_use]
    pub fn new(initial: ContextLabel) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Current label
    #[inline]
    #[must_use]
    pub fn load(&self) -> ContextLabel {
        ContextLabel::clone(&self.current.load())
    }

    /// Replace the current label
    #[inline]
    pub fn store(&self, label: ContextLabel) {
        self.current.store(Arc::new(label));
    }
}

/// Where the listener finds the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// Known address
    Fixed(SocketAddr),
    /// Poll the process environment until an address appears
    Environment,
}

impl AddressSource {
    fn resolve(self) -> Option<SocketAddr> {
        match self {
            AddressSource::Fixed(addr) => Some(addr),
            AddressSource::Environment => env::address(),
        }
    }
}

/// Background listener feeding a [`ContextCache`]
#[derive(Debug)]
pub struct ContextListener {
    cache: Arc<ContextCache>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ContextListener {
    /// Spawn the listener thread
    ///
    /// The cache starts at `initial`. Address discovery, connection retries
    /// and receive timeouts all use `poll_interval`, which bounds how long the
    /// thread takes to notice [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    /// - `ChannelError::Io` if the thread cannot be spawned
    pub fn spawn(
        source: AddressSource,
        initial: ContextLabel,
        poll_interval: Duration,
    ) -> Result<Self, ChannelError> {
        let cache = Arc::new(ContextCache::new(initial));
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            source,
            cache: Arc::clone(&cache),
            running: Arc::clone(&running),
            poll_interval,
        };
        let handle = std::thread::Builder::new()
            .name("covctx-listener".to_string())
            .spawn(move || worker.run())
            .map_err(|e| ChannelError::io("spawn listener", e))?;

        Ok(Self {
            cache,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Shared cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    /// Whether the listener thread is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the thread to stop and wait for it
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("Context listener thread panicked");
            }
        }
    }
}

impl ContextSource for ContextListener {
    fn current(&self) -> ContextLabel {
        self.cache.load()
    }
}

impl Drop for ContextListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    source: AddressSource,
    cache: Arc<ContextCache>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Worker {
    fn run(self) {
        if let Some(mut subscriber) = self.connect() {
            self.receive(&mut subscriber);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn keep_going(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for an address and a publisher accepting on it
    fn connect(&self) -> Option<SocketSubscriber> {
        let mut announced = false;
        while self.keep_going() {
            if let Some(address) = self.source.resolve() {
                match SocketSubscriber::connect(address) {
                    Ok(subscriber) => {
                        tracing::debug!("Connected to context publisher at {}", address);
                        return Some(subscriber);
                    }
                    Err(e) if !announced => {
                        tracing::debug!("Publisher at {} not reachable yet: {}", address, e);
                        announced = true;
                    }
                    Err(_) => {}
                }
            }
            std::thread::sleep(self.poll_interval);
        }
        None
    }

    fn receive(&self, subscriber: &mut SocketSubscriber) {
        if let Err(e) = subscriber.set_timeout(Some(self.poll_interval)) {
            tracing::debug!("Listener giving up: {}", e);
            self.cache.store(ContextLabel::none());
            return;
        }

        while self.keep_going() {
            match subscriber.recv() {
                Ok(Some(Message::Set(label))) => {
                    tracing::trace!("New context: {}", label);
                    self.cache.store(label);
                }
                Ok(Some(Message::Clear)) => {
                    tracing::trace!("Context cleared");
                    self.cache.store(ContextLabel::none());
                }
                Ok(Some(Message::Stop)) => {
                    tracing::debug!("Publisher stopped");
                    self.cache.store(ContextLabel::none());
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Context channel gone: {}", e);
                    self.cache.store(ContextLabel::none());
                    return;
                }
            }
        }
    }
}
