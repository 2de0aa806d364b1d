//! Channel configuration
//!
//! Publisher and reader both take a [`ContextConfig`]. It carries the channel
//! identity explicitly; [`ContextConfig::from_env`] is the fallback used at a
//! process boundary where explicit passing is impossible.

use crate::env;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which medium carries the label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Atomically replaced file, read on every query
    #[default]
    File,
    /// Local TCP publish/subscribe with a cached label per reader
    Socket,
}

impl TransportKind {
    /// Name used in configuration and environment
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportKind::File => "file",
            TransportKind::Socket => "socket",
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(TransportKind::File),
            "socket" => Ok(TransportKind::Socket),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Transport to use
    pub transport: TransportKind,
    /// Explicit channel file (otherwise a fresh temporary file per session)
    pub file_path: Option<PathBuf>,
    /// Directory for the fresh temporary channel file
    pub file_dir: Option<PathBuf>,
    /// Explicit socket address (reader side)
    pub address: Option<SocketAddr>,
    /// Whether the publisher writes the channel variables into the environment
    pub export_env: bool,
    /// Listener poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// How long `stop` waits for subscribers to take the stop sentinel
    pub linger_ms: u64,
    /// Per-subscriber write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Bind attempts before `start` gives up
    pub max_bind_attempts: u32,
}

impl ContextConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration from the process environment
    ///
    /// Reads the transport, file path and address variables. A file path in
    /// the environment selects the file transport regardless of the transport
    /// variable; an address without a file path selects the socket transport.
    ///
    /// # Errors
    /// - `ConfigError::UnknownTransport` if the transport variable is set to
    ///   something other than `file` or `socket`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(env::TRANSPORT_VAR) {
            if !raw.trim().is_empty() {
                config.transport = raw.parse()?;
            }
        }

        config.address = env::address();
        config.file_path = env::file_path();

        if config.file_path.is_some() {
            config.transport = TransportKind::File;
        } else if config.address.is_some() {
            config.transport = TransportKind::Socket;
        }

        Ok(config)
    }

    /// Configuration from a TOML document
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    /// - `ConfigError::Toml` if the document is invalid
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// With transport
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// With explicit channel file
    #[inline]
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// With directory for temporary channel files
    #[inline]
    #[must_use]
    pub fn with_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }

    /// With explicit socket address
    #[inline]
    #[must_use]
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// With environment export on or off
    #[inline]
    #[must_use]
    pub fn with_export_env(mut self, export: bool) -> Self {
        self.export_env = export;
        self
    }

    /// With listener poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// With stop linger
    #[inline]
    #[must_use]
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger_ms = duration_ms(linger);
        self
    }

    /// Listener poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Stop linger
    #[inline]
    #[must_use]
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    /// Per-subscriber write timeout
    #[inline]
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::File,
            file_path: None,
            file_dir: None,
            address: None,
            export_env: true,
            poll_interval_ms: 125,
            linger_ms: 1500,
            write_timeout_ms: 1000,
            max_bind_attempts: 10,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covctx_test_utils::env_lock;

    #[test]
    fn defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.transport, TransportKind::File);
        assert!(config.export_env);
        assert_eq!(config.poll_interval(), Duration::from_millis(125));
        assert_eq!(config.linger(), Duration::from_millis(1500));
    }

    #[test]
    fn builder() {
        let config = ContextConfig::new()
            .with_transport(TransportKind::Socket)
            .with_export_env(false)
            .with_poll_interval(Duration::from_millis(20));

        assert_eq!(config.transport, TransportKind::Socket);
        assert!(!config.export_env);
        assert_eq!(config.poll_interval_ms, 20);
    }

    #[test]
    fn transport_parsing() {
        assert_eq!("file".parse::<TransportKind>().unwrap(), TransportKind::File);
        assert_eq!(" Socket ".parse::<TransportKind>().unwrap(), TransportKind::Socket);
        assert!(matches!(
            "zmq".parse::<TransportKind>(),
            Err(ConfigError::UnknownTransport(_))
        ));
    }

    #[test]
    fn toml_partial_document() {
        let config = ContextConfig::from_toml_str(
            r#"
            transport = "socket"
            linger_ms = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.transport, TransportKind::Socket);
        assert_eq!(config.linger_ms, 200);
        assert_eq!(config.poll_interval_ms, 125);
    }

    #[test]
    fn toml_rejects_unknown_transport() {
        assert!(ContextConfig::from_toml_str("transport = \"pigeon\"").is_err());
    }

    #[test]
    fn from_env_prefers_file_path() {
        let _guard = env_lock();
        std::env::set_var(env::TRANSPORT_VAR, "socket");
        std::env::set_var(env::FILE_PATH_VAR, "/tmp/covctx-test-channel");
        std::env::set_var(env::ADDRESS_VAR, "127.0.0.1:9");

        let config = ContextConfig::from_env().unwrap();

        std::env::remove_var(env::TRANSPORT_VAR);
        std::env::remove_var(env::FILE_PATH_VAR);
        std::env::remove_var(env::ADDRESS_VAR);

        assert_eq!(config.transport, TransportKind::File);
        assert_eq!(
            config.file_path.as_deref(),
            Some(std::path::Path::new("/tmp/covctx-test-channel"))
        );
        assert_eq!(config.address, Some("127.0.0.1:9".parse().unwrap()));
    }

    #[test]
    fn from_env_address_selects_socket() {
        let _guard = env_lock();
        std::env::remove_var(env::FILE_PATH_VAR);
        std::env::remove_var(env::TRANSPORT_VAR);
        std::env::set_var(env::ADDRESS_VAR, "tcp://127.0.0.1:4000");

        let config = ContextConfig::from_env().unwrap();
        std::env::remove_var(env::ADDRESS_VAR);

        assert_eq!(config.transport, TransportKind::Socket);
    }
}
