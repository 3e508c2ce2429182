//! The threadline streaming engine.
//!
//! Resolves stored conversation history into provider messages, streams a
//! completion and persists its deltas into the target message as they
//! arrive.

pub mod accumulate;
pub mod assemble;
pub mod commit;
pub mod events;
pub mod history;
pub mod stream;

pub use accumulate::{StockChunk, StreamStock};
pub use assemble::ContentAssembler;
pub use commit::{CommitCoordinator, FlushReport};
pub use events::{EventBody, WireEvent};
pub use history::{tail_group, HistoryResolver, ResolveMode, ResolvedChain, Selector, SelectorKind};
pub use stream::{merge, PostedMessage, StreamEngine, StreamHandle};
