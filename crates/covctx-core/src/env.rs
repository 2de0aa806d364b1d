//! Process environment contract
//!
//! Environment variables are how a channel's identity crosses a process
//! boundary: a subprocess inherits them at spawn and has no other handle on
//! the publisher. Within a process, identities travel through
//! [`ContextConfig`](crate::config::ContextConfig) instead.

use crate::error::ChannelError;
use crate::label::ContextLabel;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Mirror of the current label for same-process readers
pub const CONTEXT_VAR: &str = "COVERAGE_DYNAMIC_CONTEXT";

/// Socket channel address
pub const ADDRESS_VAR: &str = "COVERAGE_DYNAMIC_CONTEXT_ADDRESS";

/// File channel path
pub const FILE_PATH_VAR: &str = "COVERAGE_DYNAMIC_CONTEXT_FILE_PATH";

/// Transport selection for configurations built from the environment
pub const TRANSPORT_VAR: &str = "COVERAGE_DYNAMIC_CONTEXT_TRANSPORT";

/// Label mirrored in [`CONTEXT_VAR`], "no context" when unset or empty
#[must_use]
pub fn inherited_label() -> ContextLabel {
    match std::env::var(CONTEXT_VAR) {
        Ok(text) => ContextLabel::new(&text).unwrap_or_default(),
        Err(_) => ContextLabel::none(),
    }
}

/// Write the label mirror; "no context" is stored as an empty value
pub(crate) fn mirror_label(label: &ContextLabel) {
    std::env::set_var(CONTEXT_VAR, label.as_str().unwrap_or(""));
}

/// Channel file path from [`FILE_PATH_VAR`]
#[must_use]
pub fn file_path() -> Option<PathBuf> {
    std::env::var_os(FILE_PATH_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Socket address from [`ADDRESS_VAR`]
///
/// Unparseable values are treated as absent.
#[must_use]
pub fn address() -> Option<SocketAddr> {
    let raw = std::env::var(ADDRESS_VAR).ok()?;
    match parse_address(&raw) {
        Ok(addr) => Some(addr),
        Err(err) => {
            tracing::debug!("Ignoring {}: {}", ADDRESS_VAR, err);
            None
        }
    }
}

/// Parse a channel address, accepting an optional `tcp://` scheme
///
/// # Errors
/// - `ChannelError::InvalidAddress` if the text is not `host:port`
pub fn parse_address(raw: &str) -> Result<SocketAddr, ChannelError> {
    let trimmed = raw.trim();
    let without_scheme = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
    without_scheme
        .parse()
        .map_err(|_| ChannelError::InvalidAddress(raw.to_string()))
}

pub(crate) fn export_file_path(path: &std::path::Path) {
    std::env::set_var(FILE_PATH_VAR, path);
}

pub(crate) fn export_address(addr: SocketAddr) {
    std::env::set_var(ADDRESS_VAR, addr.to_string());
}

/// Remove every channel variable written by a publisher
pub(crate) fn clear_exports() {
    std::env::remove_var(FILE_PATH_VAR);
    std::env::remove_var(ADDRESS_VAR);
    std::env::remove_var(CONTEXT_VAR);
}
