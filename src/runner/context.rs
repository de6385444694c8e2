//! Execution context for task running
//!
//! A run starts from a root context. Every executed task gets a child
//! context that copies its parent's variables and shares its services.

use crate::config::TaskDefinition;
use crate::runner::bus::{LogLevel, Message, MessageBus};
use crate::runner::command::{ProcessRunner, ShellRegistry, TokioProcessRunner};
use crate::runner::value::{Value, Variables};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Lifecycle state of a task context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    NotStarted,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::NotStarted => "not started",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Environment variables visible to tasks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot the process environment
    pub fn from_process() -> Self {
        Environment {
            vars: env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Environment {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Overlay the variables of a `.env` file
    pub fn load_dotenv(&mut self, path: &Path) -> Result<usize, dotenvy::Error> {
        let mut loaded = 0;
        for item in dotenvy::from_path_iter(path)? {
            let (key, value) = item?;
            self.vars.insert(key, value);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

/// Replaces registered secrets in text before it is reported
#[derive(Debug, Default)]
pub struct SecretMasker {
    secrets: RwLock<Vec<String>>,
}

impl SecretMasker {
    const MASK: &'static str = "***";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        if !secrets.contains(&secret) {
            secrets.push(secret);
            // Longest first, so a secret containing another is masked whole
            secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        }
    }

    pub fn mask(&self, text: &str) -> String {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), Self::MASK))
    }
}

/// Services shared by every context of a run
#[derive(Clone)]
pub struct Services {
    env: Arc<Environment>,
    process: Arc<dyn ProcessRunner>,
    shells: Arc<ShellRegistry>,
    masker: Arc<SecretMasker>,
    bus: Arc<MessageBus>,
    working_dir: PathBuf,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn process(&self) -> &Arc<dyn ProcessRunner> {
        &self.process
    }

    pub fn shells(&self) -> &ShellRegistry {
        &self.shells
    }

    pub fn masker(&self) -> &SecretMasker {
        &self.masker
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("shells", &self.shells)
            .field("bus", &self.bus)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

/// Collects service overrides; anything left unset gets its default
#[derive(Default)]
pub struct ServicesBuilder {
    env: Option<Environment>,
    process: Option<Arc<dyn ProcessRunner>>,
    shells: Option<ShellRegistry>,
    masker: Option<Arc<SecretMasker>>,
    bus: Option<Arc<MessageBus>>,
    working_dir: Option<PathBuf>,
}

impl ServicesBuilder {
    pub fn env(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    pub fn process(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn shells(mut self, shells: ShellRegistry) -> Self {
        self.shells = Some(shells);
        self
    }

    pub fn masker(mut self, masker: Arc<SecretMasker>) -> Self {
        self.masker = Some(masker);
        self
    }

    pub fn bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn build(self) -> Services {
        Services {
            env: Arc::new(self.env.unwrap_or_else(Environment::from_process)),
            process: self
                .process
                .unwrap_or_else(|| Arc::new(TokioProcessRunner::new())),
            shells: Arc::new(self.shells.unwrap_or_default()),
            masker: self.masker.unwrap_or_default(),
            bus: self.bus.unwrap_or_default(),
            working_dir: self
                .working_dir
                .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
        }
    }
}

/// Per-run or per-task execution state
pub struct ExecutionContext {
    services: Services,

    /// Id of the task this context belongs to; `None` for the root
    task_id: Option<String>,

    /// Variables visible to templates
    pub variables: Variables,

    /// Values published for later tasks
    pub outputs: Variables,

    pub status: TaskStatus,

    /// Errors recorded through [`ExecutionContext::error`]
    errors: Vec<String>,
}

impl ExecutionContext {
    /// Create a root context
    pub fn root(services: Services) -> Self {
        let env: Variables = services
            .env()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();

        let mut variables = Variables::new();
        variables.insert("env".to_string(), Value::Map(env));
        variables.insert("outputs".to_string(), Value::Map(Variables::new()));

        ExecutionContext {
            services,
            task_id: None,
            variables,
            outputs: Variables::new(),
            status: TaskStatus::NotStarted,
            errors: Vec::new(),
        }
    }

    /// Create the context for `task` below this one
    pub fn child(&self, task: &TaskDefinition) -> Self {
        let mut variables = self.variables.clone();
        variables.insert("task".to_string(), task_metadata(task));

        ExecutionContext {
            services: self.services.clone(),
            task_id: Some(task.id.clone()),
            variables,
            outputs: Variables::new(),
            status: TaskStatus::NotStarted,
            errors: Vec::new(),
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn bus(&self) -> &MessageBus {
        self.services.bus()
    }

    pub fn env(&self) -> &Environment {
        self.services.env()
    }

    pub fn masker(&self) -> &SecretMasker {
        self.services.masker()
    }

    pub fn working_dir(&self) -> &Path {
        self.services.working_dir()
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(key.into(), value.into());
    }

    /// Copy this context's outputs into `variables.outputs[<task id>]`
    ///
    /// Other entries of the `outputs` map are kept; a non-map `outputs`
    /// variable is replaced by a map.
    pub fn publish_outputs(&mut self) {
        let Some(id) = self.task_id.clone() else {
            return;
        };

        let entry = self
            .variables
            .entry("outputs".to_string())
            .or_insert_with(|| Value::Map(Variables::new()));
        if entry.as_map().is_none() {
            *entry = Value::Map(Variables::new());
        }
        if let Some(outputs) = entry.as_map_mut() {
            outputs.insert(id, Value::Map(self.outputs.clone()));
        }
    }

    /// Publish a log message with secrets masked
    pub fn log(&self, level: LogLevel, text: impl AsRef<str>) {
        let text = self.masker().mask(text.as_ref());
        self.bus().publish(Message::log(level, text));
    }

    pub fn info(&self, text: impl AsRef<str>) {
        self.log(LogLevel::Info, text);
    }

    pub fn debug(&self, text: impl AsRef<str>) {
        self.log(LogLevel::Debug, text);
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        self.log(LogLevel::Warning, text);
    }

    /// Record an error and publish it
    pub fn error(&mut self, error: impl fmt::Display) {
        let message = match &self.task_id {
            Some(id) => format!("{}: {}", id, error),
            None => error.to_string(),
        };
        let message = self.masker().mask(&message);
        self.errors.push(message.clone());
        self.bus().publish(Message::Error { message });
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("status", &self.status)
            .field("outputs", &self.outputs)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// The `task` variable seen by a task's templates
fn task_metadata(task: &TaskDefinition) -> Value {
    let mut meta = Variables::new();
    meta.insert("name".to_string(), Value::from(task.name.as_str()));
    meta.insert("id".to_string(), Value::from(task.id.as_str()));
    meta.insert("description".to_string(), Value::from(task.description.clone()));
    meta.insert("timeout".to_string(), Value::from(task.timeout));
    meta.insert("continue_on_error".to_string(), Value::from(task.continue_on_error));
    meta.insert("dependencies".to_string(), Value::from(task.dependencies.clone()));
    Value::Map(meta)
}
