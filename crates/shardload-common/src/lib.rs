//! Shardload Common Library
//!
//! Pieces shared by the shardload binaries:
//!
//! - **Logging**: subscriber setup for console, rolling files, text or JSON
//! - **Progress**: terminal progress bars and count formatting
//!
//! # Example
//!
//! ```no_run
//! use shardload_common::logging::{init_logging, LogConfig};
//! use shardload_common::progress::create_counter;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let bar = create_counter("documents indexed");
//!     bar.inc(1);
//!     bar.finish();
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod logging;
pub mod progress;
