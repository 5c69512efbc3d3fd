//! Configuration for the Mouth server.
//!
//! The configuration is read from a `config.yml` file in a config folder. All sections and values
//! are optional and fall back to defaults. Individual values can be overridden from the command
//! line or the environment through [`OverridableConfig`].
//!
//! ```yaml
//! mouth:
//!   host: 0.0.0.0
//!   port: 8889
//! aggregator:
//!   flush_interval: 10
//! sink:
//!   host: localhost
//!   port: 27017
//!   database: mouth
//! ```
#![warn(missing_docs)]

mod config;

pub use config::*;
