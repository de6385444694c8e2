//! Task collection validation
//!
//! Checks that can be made before anything runs. Dependencies that do not
//! resolve are left to the runner, which reports them for the targets that
//! actually need them.

use crate::config::collection::{Dependent, TaskCollection};
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashSet;

/// Validate a complete task collection
pub fn validate_tasks(tasks: &TaskCollection) -> ConfigResult<()> {
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "task '{}' has an empty id",
                task.name
            )));
        }
    }

    detect_circular_dependencies(tasks)
}

/// Detect circular dependencies between tasks
fn detect_circular_dependencies(tasks: &TaskCollection) -> ConfigResult<()> {
    let mut visited = HashSet::new();
    for task in tasks {
        let mut stack = Vec::new();
        check_task_cycle(tasks, task.key(), &mut visited, &mut stack)?;
    }
    Ok(())
}

/// Recursively check for cycles in task dependencies
fn check_task_cycle(
    tasks: &TaskCollection,
    key: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> ConfigResult<()> {
    // Unknown dependencies are reported at run time
    let Some(task) = tasks.get(key) else {
        return Ok(());
    };
    let key = task.key();

    if stack.iter().any(|entry| entry == key) {
        stack.push(key.to_string());
        return Err(ConfigError::CircularDependency(stack.join(" -> ")));
    }

    if visited.contains(key) {
        return Ok(());
    }

    stack.push(key.to_string());
    for dependency in task.dependencies() {
        check_task_cycle(tasks, dependency, visited, stack)?;
    }
    stack.pop();
    visited.insert(key.to_string());

    Ok(())
}
