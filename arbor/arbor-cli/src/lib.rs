//! Library for the Arbor CLI: engine setup, command handlers and output.

pub mod commands;
pub mod output;

pub use commands::*;
pub use output::OutputFormat;
