//! Foundational system components for Mouth's services.
//!
//! Services own their state exclusively and communicate only through messages sent to an
//! [`Addr`]. Each service drains its inbox from a single task, so state owned by a service never
//! needs a lock.

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
