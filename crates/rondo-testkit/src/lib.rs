//! Rondo testing infrastructure
//!
//! Scenarios, a key/value domain state and assertion helpers shared by the
//! engine's integration tests and the command-line runner.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use rondo_core::EngineConfig;
//! use rondo_engine::Explorer;
//! use rondo_testkit::*;
//!
//! init_test_tracing();
//! let scenario = Alternation { rounds: Some(3) };
//! let report = Explorer::new(EngineConfig::default(), &scenario)
//!     .unwrap()
//!     .run()
//!     .unwrap();
//! assert_clean!(report);
//! ```

pub mod assertions;
pub mod scenarios;
pub mod space;

pub use assertions::*;
pub use scenarios::*;
pub use space::{KvSlotProcessor, KvSpace};

/// Install a test-writer subscriber once per process.
///
/// `RUST_LOG` wins when set; otherwise only warnings are shown.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}
