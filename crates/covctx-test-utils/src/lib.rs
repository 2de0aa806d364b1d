//! Testing utilities for the coverage context workspace
//!
//! Shared test helpers: process-environment serialization, polling, and
//! scratch directories for channel files.

#![allow(missing_docs)]

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialize tests that read or write process environment variables.
///
/// The test harness runs tests on parallel threads and the environment is
/// process-global.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock()
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Scratch directory plus a channel path inside it that does not exist yet.
pub fn scratch_channel() -> (TempDir, PathBuf) {
    let dir = tempfile::Builder::new()
        .prefix("covctx-test-")
        .tempdir()
        .unwrap();
    let path = dir.path().join("context.ctx");
    (dir, path)
}
