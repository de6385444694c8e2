//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, task file loading, and wiring
//! the runner's output to the terminal.

pub mod app;

// Re-export main types
pub use app::*;
