//! Plank - a YAML-based task runner
//!
//! Plank reads tasks from a `planktasks.yaml` file, orders the requested
//! tasks after their dependencies, and runs each task's script with its
//! shell. Tasks can declare templated inputs, timeouts, and whether the run
//! should carry on after they fail; values a task prints as outputs are
//! visible to the tasks that run after it.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;

// Re-export commonly used types
pub use error::{PlankError, Result};

/// Current version of Plank
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
