//! lp-core: shared identifiers, paths, media value types and configuration.
//!
//! This crate is the foundational dependency for the other lp-* crates. It
//! provides the [`SharedIdentifier`] that joins a still image to its motion
//! clip, the content-addressed naming scheme for paired components, the
//! rational [`MediaTime`] used across the remux engine, and the application
//! [`config::Config`].

pub mod config;
pub mod error;
pub mod ids;
pub mod media;
pub mod paths;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::SharedIdentifier;
pub use media::*;
pub use paths::{content_addressed_path, is_directory, ComponentKind, PathNamer};
