//! # vidq-core
//!
//! Core types, traits, and abstractions for the vidq transcoding queue.
//!
//! This crate provides the job and video models, the repository and
//! executor traits the queue engine depends on, and the shared error type.

pub mod defaults;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use identity::WorkerId;
pub use models::*;
pub use traits::*;
