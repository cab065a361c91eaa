//! Shared building blocks of the camwatch motion alert daemon: config,
//! stream framing, event extraction, alert counters and digest auth.

pub mod alerts;
pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod framer;

pub use error::{Error, Result};
