//! Backing key-value store collaborator.
//!
//! The state-transition core reads plain state through point lookups on a [`StateSnapshot`] and
//! persists blocks through a [`WriteBatch`]. [`MemoryStore`] is a copy-on-write in-memory backend
//! that gives every snapshot a stable view of the tables as they were when it was taken.

mod memory;
mod store;
mod tables;

pub use memory::*;
pub use store::*;
pub use tables::*;
