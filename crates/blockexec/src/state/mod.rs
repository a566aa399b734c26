//! Account state access and the per-block state overlay.
//!
//! Readers resolve plain-state records into [`Account`](crate::Account)s, recovering lost
//! EIP-7702 code hashes on the way. [`ReadThroughCache`] sits in front of a snapshot when the
//! same keys are read repeatedly. [`IntraBlockState`] layers the changes of a block on top of a
//! reader and hands them to a [`StateWriter`] once the block is done.

mod cache;
mod intra_block;
mod journal;
mod metrics;
mod reader;
mod recovery;
mod writer;

pub use cache::*;
pub use intra_block::*;
pub use metrics::*;
pub use reader::*;
pub use writer::*;
