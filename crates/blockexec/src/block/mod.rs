//! Block execution: the transaction loop, the consensus hooks around it, the commitments it
//! produces and their verification against the header.

mod commitment;
mod executor;
mod result;
mod verify;

pub use commitment::*;
pub use executor::*;
pub use result::*;
pub use verify::*;
