//! Diagnostic output
//!
//! Everything goes to stderr so stdout stays machine readable.

use tracing_subscriber::EnvFilter;

/// Variable holding the log filter, e.g. `COVCTX_LOG=covctx_core=debug`
pub(crate) const LOG_VAR: &str = "COVCTX_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber; later calls are ignored.
pub(crate) fn init() {
    let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
