//! T8N (state transition) tool implementation.

/// Command-line interface and main logic
pub mod cmd;
/// Error types
mod error;
/// Loading inputs and writing outputs
mod io;
/// Conversion between allocations and the plain-state store
mod state;
/// Input and output formats
mod types;

pub use cmd::*;
pub use error::*;
pub use io::*;
pub use state::*;
pub use types::*;
