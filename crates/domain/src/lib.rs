//! Shared domain types for threadline.
//!
//! Holds the conversation entities, the provider-facing message shapes, the
//! raw streaming delta types, configuration, and the error taxonomy used by
//! every other crate in the workspace.

pub mod capability;
pub mod config;
pub mod delta;
pub mod entity;
pub mod error;
pub mod message;
pub mod trace;

pub use error::{Error, Result};
