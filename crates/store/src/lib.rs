//! Persistence collaborators for threadline.
//!
//! The engine only talks to storage through [`ConversationStore`] and its
//! unit-of-work [`Transaction`]. [`MemoryStore`] is the in-process adapter
//! (optionally snapshotted to JSON); file binaries come through
//! [`FileGroupResolver`].

pub mod contract;
pub mod files;
pub mod memory;

pub use contract::{ConversationStore, Transaction};
pub use files::{DirFileGroups, DocumentRendition, FileGroupResolver, FileRendition, PageRendition};
pub use memory::MemoryStore;
