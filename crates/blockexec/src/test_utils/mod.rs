//! Test utilities for the state-transition core.

mod store;
mod tx;
mod vm;

pub use store::*;
pub use tx::*;
pub use vm::*;
