//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use plank::config::{parse_tasks, TaskCollection, TaskDefinition};
use plank::error::{ExecutionError, ExecutionResult};
use plank::runner::{
    Environment, ExecutionContext, MemorySink, MessageBus, Runner, Services, TaskHandler,
    TaskStatus,
};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Create a temporary directory with a planktasks.yaml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("planktasks.yaml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Parse a task document, panicking on errors
pub fn tasks(yaml: &str) -> TaskCollection {
    parse_tasks(yaml).unwrap()
}

/// What a [`Recorder`] does when asked to run a task
#[derive(Debug, Clone)]
pub enum Behavior {
    Complete,
    Fail,
    /// Report the task as cancelled
    Cancel,
    /// Block until the cancellation token fires
    Hang,
    /// Publish one output and complete
    Output(&'static str, &'static str),
}

/// A handler that records the tasks it runs instead of spawning processes
#[derive(Debug, Default)]
pub struct Recorder {
    behaviors: HashMap<String, Behavior>,
    runs: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(task.to_string(), behavior);
        self
    }

    /// Ids of the tasks run, in order
    pub fn executed(&self) -> Vec<String> {
        self.runs.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    /// The rendered script a task was run with
    pub fn script(&self, task: &str) -> Option<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == task)
            .map(|(_, run)| run.clone())
    }
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn run(
        &self,
        task: &TaskDefinition,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult<TaskStatus> {
        self.runs
            .lock()
            .unwrap()
            .push((task.id.clone(), task.run.clone()));

        match self.behaviors.get(&task.id).cloned().unwrap_or(Behavior::Complete) {
            Behavior::Complete => Ok(TaskStatus::Completed),
            Behavior::Fail => Ok(TaskStatus::Failed),
            Behavior::Cancel => Ok(TaskStatus::Cancelled),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            }
            Behavior::Output(key, value) => {
                ctx.set_output(key, value);
                Ok(TaskStatus::Completed)
            }
        }
    }
}

/// Services with an empty environment and a recording sink
pub fn services() -> (Services, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let bus = Arc::new(MessageBus::new());
    bus.subscribe(sink.clone());
    let services = Services::builder()
        .env(Environment::from_pairs([("PLANK_TEST", "1")]))
        .bus(bus)
        .build();
    (services, sink)
}

/// A runner driving `recorder`
pub fn runner(recorder: Arc<Recorder>) -> (Runner, Arc<MemorySink>) {
    let (services, sink) = services();
    (Runner::with_handler(services, recorder), sink)
}
