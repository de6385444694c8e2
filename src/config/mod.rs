//! Task file parsing and validation
//!
//! This module handles parsing of planktasks.yaml files into task
//! definitions, the keyed task collection, and validation.

pub mod collection;
pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use collection::*;
pub use parse::*;
pub use schema::*;
pub use types::*;
