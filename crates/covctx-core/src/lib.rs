//! Coverage Context Propagation
//!
//! Carries the "current test context" label from a test runner to coverage
//! collectors in the same process and in every subprocess the test spawns.
//!
//! # Architecture
//!
//! ```text
//! test runner ─► CoverageContextPlugin ─► ContextPublisher ─► ContextChannel (file | socket)
//!                                                                  │
//!            coverage engine ◄─ ContextReader ◄─ ContextSource ◄───┘  (any process)
//! ```
//!
//! Channel identities cross process boundaries through environment variables
//! (see [`env`]); within a process they are passed through [`ContextConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use covctx_core::prelude::*;
//!
//! # fn example() -> Result<(), covctx_core::ContextError> {
//! let plugin = CoverageContextPlugin::new(ContextConfig::new());
//! plugin.session_start()?;
//!
//! plugin.wrap_phase("tests/test_foo.py::test_bar", TestPhase::Call, || {
//!     // In this process or any child started here:
//!     let label = ContextReader::global().dynamic_context();
//!     assert!(label.is_some());
//! });
//!
//! plugin.session_finish()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod label;
pub mod port;
pub mod publisher;
pub mod reader;
pub mod session;

// Re-exports for convenience
pub use channel::{ChannelIdentity, ContextChannel, ContextSource};
pub use config::{ContextConfig, TransportKind};
pub use error::{ChannelError, ConfigError, ContextError, ContextResult, LabelError};
pub use label::{ContextLabel, TestPhase, CLEAR_SENTINEL, MAX_LABEL_LEN, STOP_SENTINEL};
pub use port::PortAllocator;
pub use publisher::{ContextGuard, ContextPublisher, PublisherState};
pub use reader::ContextReader;
pub use session::{CoverageContextPlugin, PLUGIN_NAME};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for publishing and reading context labels
    pub use crate::config::{ContextConfig, TransportKind};
    pub use crate::label::{ContextLabel, TestPhase};
    pub use crate::publisher::{ContextGuard, ContextPublisher};
    pub use crate::reader::ContextReader;
    pub use crate::session::CoverageContextPlugin;
}
