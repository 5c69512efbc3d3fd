//! Common utilities shared by Mouth crates.

#![warn(missing_docs)]

mod time;

pub use time::*;
