//! File transport
//!
//! The channel file holds exactly the current label as raw bytes, empty for
//! "no context". Writers never modify the file in place: the new content goes
//! to a temporary file in the same directory which is then renamed over the
//! channel path, so a concurrent reader opens either the old file or the new
//! one and never sees a partial write.

use super::{ChannelIdentity, ContextChannel, ContextSource};
use crate::config::ContextConfig;
use crate::error::ChannelError;
use crate::label::ContextLabel;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const CHANNEL_PREFIX: &str = "covctx-";
const CHANNEL_SUFFIX: &str = ".ctx";

/// Atomically replace the channel file at `path` with `label`
///
/// # Errors
/// - `ChannelError::File` if the temporary file cannot be written or renamed
pub fn publish(path: &Path, label: &ContextLabel) -> Result<(), ChannelError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".covctx-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ChannelError::file(dir, e))?;

    tmp.write_all(label.as_str().unwrap_or("").as_bytes())
        .map_err(|e| ChannelError::file(tmp.path(), e))?;

    tmp.persist(path)
        .map_err(|e| ChannelError::file(path, e.error))?;

    Ok(())
}

/// Read the label in the channel file at `path`
///
/// A missing file, an empty file and content that is not UTF-8 all read as
/// "no context".
///
/// # Errors
/// - `ChannelError::File` for IO failures other than a missing file
pub fn try_read(path: &Path) -> Result<ContextLabel, ChannelError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(std::str::from_utf8(&bytes)
            .map(ContextLabel::from_payload)
            .unwrap_or_default()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ContextLabel::none()),
        Err(e) => Err(ChannelError::file(path, e)),
    }
}

/// Read the label in the channel file at `path`, mapping any failure to
/// "no context"
#[must_use]
pub fn read(path: &Path) -> ContextLabel {
    try_read(path).unwrap_or_else(|e| {
        tracing::trace!("Channel file unreadable, reporting no context: {}", e);
        ContextLabel::none()
    })
}

/// Publisher side of the file transport
#[derive(Debug)]
pub struct FileChannel {
    path: PathBuf,
    /// Set when the channel owns a fresh temporary file; dropping it removes
    /// the file.
    temp: Option<TempPath>,
}

impl FileChannel {
    /// Allocate the channel file
    ///
    /// Uses `config.file_path` when set, otherwise creates a fresh temporary
    /// file in `config.file_dir` or the system temp directory. The file starts
    /// out empty.
    ///
    /// # Errors
    /// - `ChannelError::File` if the file cannot be created
    pub fn create(config: &ContextConfig) -> Result<Self, ChannelError> {
        if let Some(path) = &config.file_path {
            publish(path, &ContextLabel::none())?;
            return Ok(Self {
                path: path.clone(),
                temp: None,
            });
        }

        let dir = config.file_dir.clone().unwrap_or_else(std::env::temp_dir);
        let temp = tempfile::Builder::new()
            .prefix(CHANNEL_PREFIX)
            .suffix(CHANNEL_SUFFIX)
            .tempfile_in(&dir)
            .map_err(|e| ChannelError::file(&dir, e))?
            .into_temp_path();

        Ok(Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        })
    }

    /// Channel file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContextChannel for FileChannel {
    fn identity(&self) -> ChannelIdentity {
        ChannelIdentity::File(self.path.clone())
    }

    fn publish(&mut self, label: &ContextLabel) -> Result<(), ChannelError> {
        publish(&self.path, label)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        match self.temp.take() {
            Some(temp) => temp.close().map_err(|e| ChannelError::file(&self.path, e)),
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ChannelError::file(&self.path, e)),
            },
        }
    }
}

/// Reader side of the file transport
///
/// Reads the file on every call; nothing is cached.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create source for the channel file at `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Channel file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContextSource for FileSource {
    fn current(&self) -> ContextLabel {
        read(&self.path)
    }
}
