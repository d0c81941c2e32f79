//! Shared types for the OpsConductor pipeline core: the error taxonomy,
//! configuration, stage artifacts, tool catalog declarations, cancellation
//! tokens, and structured trace events.

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod error;
pub mod tool;
pub mod trace;

pub use cancel::CancelToken;
pub use error::{Error, Result};
