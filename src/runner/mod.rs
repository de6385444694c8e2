//! Task execution engine
//!
//! This module handles the execution of tasks: dependency ordering,
//! execution contexts, templating, shell commands, and event reporting.

pub mod bus;
pub mod command;
pub mod context;
pub mod interpolate;
pub mod scheduler;
pub mod task;
pub mod value;

// Re-export main types
pub use bus::*;
pub use command::*;
pub use context::*;
pub use interpolate::*;
pub use scheduler::*;
pub use task::*;
pub use value::*;
