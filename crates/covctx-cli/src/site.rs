//! Interpreter start-up hook shipped inside the binary
//!
//! The hook is written out on demand to a per-version directory under the
//! system temp dir so the printed path exists wherever the binary runs.

use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Contents of the start-up hook
pub(crate) const SITECUSTOMIZE: &str = include_str!("../site/sitecustomize.py");

const HOOK_NAME: &str = "sitecustomize.py";

/// Directory the hook is installed into
pub(crate) fn site_dir() -> PathBuf {
    std::env::temp_dir().join(format!("covctx-site-{}", covctx_core::VERSION))
}

/// Make sure the hook exists with the current contents and return its directory
///
/// An up-to-date hook is left untouched; otherwise it is replaced atomically
/// so a concurrently starting interpreter never imports a partial file.
pub(crate) fn install() -> anyhow::Result<PathBuf> {
    let dir = site_dir();
    let hook = dir.join(HOOK_NAME);
    if std::fs::read_to_string(&hook).is_ok_and(|text| text == SITECUSTOMIZE) {
        return Ok(dir);
    }

    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    write_atomic(&hook, SITECUSTOMIZE.as_bytes())?;
    tracing::debug!("Installed start-up hook at {}", hook.display());
    Ok(dir)
}

fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
