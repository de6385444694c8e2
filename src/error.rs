//! Error types for Plank

use std::io;
use thiserror::Error;

/// Result type alias for Plank operations
pub type Result<T> = std::result::Result<T, PlankError>;

/// Main error type for Plank
#[derive(Error, Debug)]
pub enum PlankError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Task file parsing and dependency resolution errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find task file (searched: {0})")]
    NotFound(String),

    #[error("Invalid task file: {0}")]
    Invalid(String),

    #[error("Parse error at {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Task at {0} must define a non-empty 'name' or 'id'")]
    MissingIdentity(String),

    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Task '{task}' depends on '{dependency}', which is not defined")]
    MissingDependency { task: String, dependency: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed: {}", describe_exit(.0))]
    CommandFailed(Option<i32>),

    #[error("Input '{name}' of task '{task}' is required but rendered empty")]
    MissingInput { task: String, name: String },

    #[error("Shell '{0}' is not registered")]
    UnknownShell(String),

    #[error("Failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task timed out after {0} ms")]
    TimedOut(u64),

    #[error("Failed to render template: {0}")]
    Interpolation(#[from] InterpolationError),
}

impl ExecutionError {
    /// Whether this error came from the cancellation signal (external or timeout)
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecutionError::Cancelled | ExecutionError::TimedOut(_))
    }
}

/// Describe how a process ended, from its exit code
fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Variable interpolation errors
#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("Recursive interpolation detected in '{0}'")]
    RecursiveInterpolation(String),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for interpolation operations
pub type InterpolationResult<T> = std::result::Result<T, InterpolationError>;

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        let location = match err.location() {
            Some(loc) => format!("line {} column {}", loc.line(), loc.column()),
            None => "document".to_string(),
        };
        ConfigError::Parse {
            location,
            message: err.to_string(),
        }
    }
}
