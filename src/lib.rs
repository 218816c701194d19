//! imgcache - Build avoidance for container images
//!
//! Hashes each artifact's inputs, remembers the image built from them, and
//! reuses that image instead of rebuilding while it still exists.

pub mod artifact;
pub mod builder;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;

pub use error::{ImgcacheError, ImgcacheResult};
