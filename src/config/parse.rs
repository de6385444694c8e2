//! Task file parsing and discovery

use crate::config::collection::TaskCollection;
use crate::config::types::{TaskDefinition, TaskDocument};
use crate::error::{ConfigError, ConfigResult, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default task file names to search for
const TASK_FILE_NAMES: &[&str] = &["planktasks.yaml", "planktasks.yml"];

/// A parsed task file
#[derive(Debug, Clone)]
pub struct TaskFile {
    /// Document name (optional)
    pub name: Option<String>,

    /// Default shell for tasks that do not name one
    pub shell: Option<String>,

    /// Tasks in document order
    pub tasks: TaskCollection,
}

/// Find the task file in the current directory
pub fn find_task_file() -> ConfigResult<PathBuf> {
    let dir = env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?;
    find_task_file_in(&dir)
}

/// Find the task file in a specific directory
pub fn find_task_file_in(dir: &Path) -> ConfigResult<PathBuf> {
    let mut searched_paths = Vec::new();

    for file_name in TASK_FILE_NAMES {
        let path = dir.join(file_name);
        if path.is_file() {
            return Ok(path);
        }
        searched_paths.push(path.display().to_string());
    }

    Err(ConfigError::NotFound(searched_paths.join(", ")))
}

/// Parse a task file from a path
pub fn parse_task_file(path: &Path) -> Result<TaskFile> {
    let contents = fs::read_to_string(path)?;

    debug!(path = %path.display(), "parsing task file");
    Ok(parse_document(&contents)?)
}

/// Parse a task document from a string
pub fn parse_document(yaml: &str) -> ConfigResult<TaskFile> {
    let document: TaskDocument = serde_yaml::from_str(yaml)?;

    let mut tasks = TaskCollection::new();
    for (index, config) in document.tasks.into_iter().enumerate() {
        let task = TaskDefinition::from_config(&format!("tasks[{}]", index), config)?;
        tasks.add(task)?;
    }

    Ok(TaskFile {
        name: document.name,
        shell: document.shell,
        tasks,
    })
}

/// Parse the tasks of a document, preserving document order
pub fn parse_tasks(yaml: &str) -> ConfigResult<TaskCollection> {
    parse_document(yaml).map(|file| file.tasks)
}
