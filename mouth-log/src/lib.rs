//! Logging for all Mouth crates.
//!
//! Crates log through the macros re-exported here, [`error!`], [`warn!`], [`info!`], [`debug!`]
//! and [`trace!`], which are the `tracing` macros. Nothing is printed until the binary calls
//! `init` (feature `init`) with the `logging` and `sentry` sections of the config. Errors are also
//! reported to Sentry if a DSN is configured.
//!
//! Messages are lowercase without trailing punctuation. Values that vary between occurrences go
//! into structured fields rather than the message:
//!
//! ```
//! mouth_log::info!(documents = 2, open_buckets = 5, "flush tick");
//! ```
//!
//! Errors are logged with their chain of causes through [`LogError`]:
//!
//! ```
//! use std::io;
//! use mouth_log::LogError;
//!
//! let error = io::Error::other("connection refused");
//! mouth_log::error!("failed to store document: {}", LogError(&error));
//! ```
//!
//! Tests call `init_test!` (feature `test`) first to see the log output of the crate under test.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "init")]
#[doc(inline)]
pub use sentry::Hub;
