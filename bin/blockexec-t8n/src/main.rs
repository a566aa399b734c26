//! `blockexec-t8n`: runs one block through the blockexec core.
//!
//! Reads a prestate allocation, a block environment and signed transactions from JSON and
//! prints the execution result together with the post-state allocation.

use clap::Parser;

mod cmd;
pub use cmd::*;

/// Logging setup shared by the commands
pub mod common;
/// State transition command
pub mod t8n;

fn main() -> Result<(), Error> {
    set_thread_panic_hook();
    MainCmd::parse().run().inspect_err(|e| eprintln!("{e}"))
}

/// Makes a panic in any thread exit the process after printing a backtrace.
fn set_thread_panic_hook() {
    use std::{
        backtrace::Backtrace,
        panic::{set_hook, take_hook},
        process::exit,
    };
    let orig_hook = take_hook();
    set_hook(Box::new(move |panic_info| {
        eprintln!("Custom backtrace: {}", Backtrace::capture());
        orig_hook(panic_info);
        exit(1);
    }));
}
