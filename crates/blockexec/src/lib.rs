//! State-transition core for an Ethereum execution client.
//!
//! The crate resolves accounts out of a plain-state key-value layout, applies a block's
//! transactions against an in-memory overlay, runs the protocol system calls around them and
//! verifies the computed commitments against the block header.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod account;
pub use account::*;

mod block;
pub use block::*;

mod config;
pub use config::*;

mod consensus;
pub use consensus::*;

mod error;
pub use error::*;

mod evm;
pub use evm::*;

mod gas;
pub use gas::*;

pub mod kv;

mod state;
pub use state::*;

mod system_call;
pub use system_call::*;

mod tracer;
pub use tracer::*;

mod transition;
pub use transition::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
