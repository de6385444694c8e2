//! Core task definition types
//!
//! This module defines the data structures that represent a planktasks.yaml
//! document and the task definitions built from it.

use crate::error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level task document structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDocument {
    /// Document name (optional)
    #[serde(default)]
    pub name: Option<String>,

    /// Default shell for tasks that do not name one
    #[serde(default)]
    pub shell: Option<String>,

    /// Tasks in document order
    pub tasks: Vec<TaskConfig>,
}

/// A task mapping as written in the document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Stable key (defaults to name)
    #[serde(default)]
    pub id: Option<String>,

    /// Display name (defaults to id)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Keys of tasks that must run first
    #[serde(
        default,
        alias = "deps",
        alias = "dependencies",
        deserialize_with = "deserialize_names"
    )]
    pub needs: Vec<String>,

    /// Timeout in milliseconds, 0 for none
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub timeout: u64,

    #[serde(
        default,
        rename = "continue-on-error",
        alias = "continueOnError",
        deserialize_with = "deserialize_flag"
    )]
    pub continue_on_error: bool,

    /// Input blocks
    #[serde(default, alias = "with", deserialize_with = "deserialize_inputs")]
    pub inputs: Vec<InputBlock>,

    /// Script body, rendered before execution
    #[serde(default)]
    pub run: Option<String>,

    /// Shell used to run the script
    #[serde(default)]
    pub shell: Option<String>,
}

/// Block form of an input
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputConfig {
    #[serde(default)]
    name: Option<String>,

    #[serde(default, deserialize_with = "deserialize_scalar")]
    value: Option<String>,

    #[serde(default)]
    description: Option<String>,

    #[serde(default, deserialize_with = "deserialize_flag")]
    required: bool,

    #[serde(default, deserialize_with = "deserialize_scalar")]
    default: Option<String>,

    #[serde(default, rename = "type")]
    input_type: Option<String>,
}

/// A named input of a task
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputBlock {
    pub name: String,

    /// Template rendered against the task's variables
    pub expression: String,

    pub description: Option<String>,

    /// Used when the expression renders empty
    pub default_value: Option<String>,

    pub required: bool,

    /// Free-form type hint
    pub input_type: Option<String>,
}

impl InputBlock {
    /// Create an input from the scalar shorthand
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        InputBlock {
            name: name.into(),
            expression: expression.into(),
            ..Default::default()
        }
    }

    fn from_config(name: String, config: InputConfig) -> Self {
        InputBlock {
            name,
            expression: config.value.unwrap_or_default(),
            description: config.description,
            default_value: config.default,
            required: config.required,
            input_type: config.input_type,
        }
    }
}

/// An immutable task definition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskDefinition {
    /// Stable key used for lookups and outputs
    pub id: String,

    /// Display name
    pub name: String,

    pub description: Option<String>,

    /// Keys of tasks that must run first, in declared order
    pub dependencies: Vec<String>,

    /// Timeout in milliseconds, 0 for none
    pub timeout: u64,

    pub continue_on_error: bool,

    pub shell: Option<String>,

    /// Script text; holds the rendered script once prepared for execution
    pub run: String,

    pub inputs: Vec<InputBlock>,

    /// Shell environment filled from rendered inputs
    pub env: HashMap<String, String>,
}

impl TaskDefinition {
    /// Create a task whose id and name are both `key`
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        TaskDefinition {
            id: key.clone(),
            name: key,
            ..Default::default()
        }
    }

    /// Build a task from its document form; `position` is used in errors
    pub fn from_config(position: &str, config: TaskConfig) -> ConfigResult<Self> {
        let id = config.id.map(|s| s.trim().to_string()).unwrap_or_default();
        let name = config.name.map(|s| s.trim().to_string()).unwrap_or_default();

        let (id, name) = match (id.is_empty(), name.is_empty()) {
            (true, true) => return Err(ConfigError::MissingIdentity(position.to_string())),
            (true, false) => (name.clone(), name),
            (false, true) => (id.clone(), id),
            (false, false) => (id, name),
        };

        Ok(TaskDefinition {
            id,
            name,
            description: config.description,
            dependencies: config.needs,
            timeout: config.timeout,
            continue_on_error: config.continue_on_error,
            shell: config.shell,
            run: config.run.unwrap_or_default(),
            inputs: config.inputs,
            env: HashMap::new(),
        })
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = run.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_input(mut self, input: InputBlock) -> Self {
        upsert_input(&mut self.inputs, input);
        self
    }
}

/// Insert an input, replacing one with the same name in place
fn upsert_input(inputs: &mut Vec<InputBlock>, input: InputBlock) {
    match inputs.iter_mut().find(|existing| existing.name == input.name) {
        Some(existing) => *existing = input,
        None => inputs.push(input),
    }
}

/// Render a YAML scalar as the string the author wrote
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;

    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Custom deserializer for dependency lists that accepts a scalar or a sequence
fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    let raw = match value {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq
            .iter()
            .map(|item| {
                scalar_to_string(item)
                    .ok_or_else(|| D::Error::custom("dependency entries must be scalars"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![scalar_to_string(&other)
            .ok_or_else(|| D::Error::custom("dependencies must be a scalar or a sequence"))?],
    };

    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Custom deserializer for timeouts given as integers or numeric strings
fn deserialize_timeout<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match &value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("timeout must be a non-negative integer, got {}", n))),
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| {
            D::Error::custom(format!("timeout must be an integer number of milliseconds, got '{}'", s))
        }),
        _ => Err(D::Error::custom("timeout must be an integer number of milliseconds")),
    }
}

/// Custom deserializer for booleans that also accepts "true"/"false" strings
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match &value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(D::Error::custom(format!("malformed boolean '{}'", s))),
        },
        _ => Err(D::Error::custom("expected a boolean")),
    }
}

/// Custom deserializer for scalar fields that may be written as numbers or booleans
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(None),
        other => scalar_to_string(&other)
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a scalar value")),
    }
}

/// Custom deserializer for inputs in shorthand, block, or sequence form
fn deserialize_inputs<'de, D>(deserializer: D) -> Result<Vec<InputBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    let mapping = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(mapping) => mapping,
        _ => return Err(D::Error::custom("inputs must be a mapping")),
    };

    let mut inputs = Vec::new();

    for (key, value) in mapping {
        let name = scalar_to_string(&key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| D::Error::custom("input names must be non-empty scalars"))?;

        match value {
            // Block form
            Value::Mapping(_) => {
                let config = InputConfig::deserialize(value).map_err(D::Error::custom)?;
                upsert_input(&mut inputs, InputBlock::from_config(name, config));
            }
            // Sequence of named blocks
            Value::Sequence(seq) => {
                for item in seq {
                    let config = InputConfig::deserialize(item).map_err(D::Error::custom)?;
                    let item_name = config
                        .name
                        .clone()
                        .filter(|s| !s.trim().is_empty())
                        .ok_or_else(|| {
                            D::Error::custom(format!("every block under input '{}' needs a 'name'", name))
                        })?;
                    upsert_input(&mut inputs, InputBlock::from_config(item_name, config));
                }
            }
            // Scalar shorthand
            other => {
                let expression = scalar_to_string(&other)
                    .ok_or_else(|| D::Error::custom(format!("input '{}' has an invalid value", name)))?;
                upsert_input(&mut inputs, InputBlock::new(name, expression));
            }
        }
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(yaml: &str) -> TaskConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_deserialize_simple_task() {
        let config = task("name: hello\nrun: echo hello\n");
        assert_eq!(config.name.as_deref(), Some("hello"));
        assert_eq!(config.run.as_deref(), Some("echo hello"));
        assert!(config.needs.is_empty());
    }

    #[test]
    fn test_dependency_aliases() {
        assert_eq!(task("name: a\nneeds: b\n").needs, vec!["b"]);
        assert_eq!(task("name: a\ndeps: [b, c]\n").needs, vec!["b", "c"]);
        assert_eq!(task("name: a\ndependencies:\n  - b\n").needs, vec!["b"]);
    }

    #[test]
    fn test_blank_dependencies_dropped() {
        let config = task("name: a\nneeds: ['', ' ', b]\n");
        assert_eq!(config.needs, vec!["b"]);
    }

    #[test]
    fn test_timeout_string_is_trimmed() {
        assert_eq!(task("name: a\ntimeout: ' 250 '\n").timeout, 250);
        assert_eq!(task("name: a\ntimeout: 50\n").timeout, 50);
    }

    #[test]
    fn test_timeout_rejects_text() {
        let result = serde_yaml::from_str::<TaskConfig>("name: a\ntimeout: soon\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_continue_on_error_spellings() {
        assert!(task("name: a\ncontinue-on-error: true\n").continue_on_error);
        assert!(task("name: a\ncontinueOnError: 'true'\n").continue_on_error);
        assert!(serde_yaml::from_str::<TaskConfig>("name: a\ncontinue-on-error: maybe\n").is_err());
    }

    #[test]
    fn test_inputs_shorthand_and_block() {
        let config = task(
            r#"
name: a
with:
  greeting: hello
  target:
    value: "${env.USER}"
    description: who to greet
    required: true
    default: world
"#,
        );
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.inputs[0], InputBlock::new("greeting", "hello"));
        let target = &config.inputs[1];
        assert_eq!(target.expression, "${env.USER}");
        assert!(target.required);
        assert_eq!(target.default_value.as_deref(), Some("world"));
    }

    #[test]
    fn test_inputs_sequence_form_requires_names() {
        let config = task(
            r#"
name: a
inputs:
  files:
    - name: first
      value: a.txt
    - name: second
      value: b.txt
"#,
        );
        let names: Vec<_> = config.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let missing = serde_yaml::from_str::<TaskConfig>("name: a\ninputs:\n  files:\n    - value: x\n");
        assert!(missing.is_err());
    }

    #[test]
    fn test_later_input_overwrites_earlier() {
        let config = task(
            r#"
name: a
inputs:
  files:
    - name: x
      value: "1"
    - name: x
      value: "2"
"#,
        );
        assert_eq!(config.inputs, vec![InputBlock::new("x", "2")]);
    }

    #[test]
    fn test_identity_defaults() {
        let only_name = TaskDefinition::from_config("tasks[0]", task("name: build\n")).unwrap();
        assert_eq!(only_name.id, "build");

        let only_id = TaskDefinition::from_config("tasks[0]", task("id: b1\n")).unwrap();
        assert_eq!(only_id.name, "b1");

        let result = TaskDefinition::from_config("tasks[3]", task("run: echo\n"));
        assert!(matches!(result, Err(ConfigError::MissingIdentity(pos)) if pos == "tasks[3]"));
    }
}
