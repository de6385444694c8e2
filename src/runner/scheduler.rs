//! Task scheduling
//!
//! The [`Runner`] orders the requested targets after their dependencies and
//! executes them one at a time, chaining each task's context onto the
//! previous one so later tasks can read earlier outputs.

use crate::config::{TaskCollection, TaskDefinition};
use crate::error::{ConfigError, ConfigResult, ExecutionError, ExecutionResult};
use crate::runner::bus::Message;
use crate::runner::context::{ExecutionContext, Services, TaskStatus};
use crate::runner::task::{prepare_task, ShellTask, TaskHandler};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// What to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Task keys to run, in request order
    pub targets: Vec<String>,

    /// Run only the targets, not their dependencies
    pub skip_dependencies: bool,
}

impl RunOptions {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RunOptions {
            targets: targets.into_iter().map(Into::into).collect(),
            skip_dependencies: false,
        }
    }

    pub fn skip_dependencies(mut self, skip: bool) -> Self {
        self.skip_dependencies = skip;
        self
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Failed,
    Cancelled,
}

impl RunResult {
    fn from_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => RunResult::Success,
            TaskStatus::Cancelled => RunResult::Cancelled,
            _ => RunResult::Failed,
        }
    }

    /// Process exit code for this result
    pub fn exit_code(self) -> i32 {
        match self {
            RunResult::Success => 0,
            RunResult::Failed => 1,
            RunResult::Cancelled => 130,
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunResult::Success => "success",
            RunResult::Failed => "failed",
            RunResult::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// How a single task execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Cancellation had already been requested; the task never ran
    NotStarted,
    /// The handler reported a status
    Finished(TaskStatus),
    /// Cancelled or timed out while running
    Interrupted,
    /// Templating or the handler failed
    Errored,
}

/// Executes tasks from a collection
pub struct Runner {
    services: Services,
    handler: Arc<dyn TaskHandler>,
}

impl Runner {
    /// A runner that executes task scripts with their shells
    pub fn new(services: Services) -> Self {
        Self::with_handler(services, Arc::new(ShellTask::new()))
    }

    pub fn with_handler(services: Services, handler: Arc<dyn TaskHandler>) -> Self {
        Runner { services, handler }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run `options.targets` and everything they depend on
    ///
    /// When `context` is `None` a root context is created from the runner's
    /// services and released when the run ends. Failures are published on
    /// the bus; the returned result is the only other report.
    pub async fn run(
        &self,
        tasks: &TaskCollection,
        options: &RunOptions,
        context: Option<&ExecutionContext>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let owned_root;
        let root = match context {
            Some(ctx) => ctx,
            None => {
                owned_root = ExecutionContext::root(self.services.clone());
                &owned_root
            }
        };

        if options.targets.is_empty() {
            root.bus().publish(Message::error("no tasks were requested"));
            return RunResult::Failed;
        }

        let result = match self.run_targets(tasks, options, root, cancel).await {
            Ok(result) => result,
            Err(e) => {
                root.bus().publish(Message::error(&e));
                RunResult::Failed
            }
        };

        debug!(result = %result, "run finished");
        result
    }

    async fn run_targets(
        &self,
        tasks: &TaskCollection,
        options: &RunOptions,
        root: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> ConfigResult<RunResult> {
        if let [target] = options.targets.as_slice() {
            let task = tasks
                .get(target)
                .ok_or_else(|| ConfigError::TaskNotFound(target.clone()))?;

            if task.dependencies.is_empty() || options.skip_dependencies {
                return Ok(self.run_single(task, root, cancel).await);
            }
        }

        let order = tasks.resolve(&options.targets, options.skip_dependencies)?;
        debug!(
            order = ?order.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            "resolved execution order"
        );

        Ok(self.run_ordered(&order, root, cancel).await)
    }

    async fn run_single(
        &self,
        task: &TaskDefinition,
        root: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> RunResult {
        let (_, outcome) = self.execute(task, root, cancel).await;
        match outcome {
            Outcome::NotStarted | Outcome::Interrupted => RunResult::Cancelled,
            Outcome::Finished(status) => RunResult::from_status(status),
            Outcome::Errored => RunResult::Failed,
        }
    }

    async fn run_ordered(
        &self,
        order: &[&TaskDefinition],
        root: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> RunResult {
        let mut failed = false;
        let mut previous: Option<ExecutionContext> = None;

        for &task in order {
            if failed && !task.continue_on_error {
                debug!(task = %task.id, "skipping after earlier failure");
                root.bus().publish(Message::started(&task.id));
                root.bus().publish(Message::finished(&task.id, TaskStatus::Skipped));
                continue;
            }

            if let Some(prev) = previous.as_mut() {
                prev.publish_outputs();
            }
            let parent = previous.as_ref().unwrap_or(root);

            let (ctx, outcome) = self.execute(task, parent, cancel).await;
            match outcome {
                Outcome::NotStarted | Outcome::Finished(TaskStatus::Cancelled) => {
                    return RunResult::Cancelled;
                }
                Outcome::Finished(TaskStatus::Failed) | Outcome::Errored => failed = true,
                Outcome::Finished(_) | Outcome::Interrupted => {}
            }

            previous = Some(ctx);
        }

        if failed {
            RunResult::Failed
        } else {
            RunResult::Success
        }
    }

    /// Run one task in a child of `parent` and report its start and finish
    #[instrument(skip_all, fields(task = %task.id))]
    async fn execute(
        &self,
        task: &TaskDefinition,
        parent: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> (ExecutionContext, Outcome) {
        let mut ctx = parent.child(task);
        ctx.bus().publish(Message::started(&task.id));

        if cancel.is_cancelled() {
            ctx.status = TaskStatus::Cancelled;
            ctx.bus().publish(Message::finished(&task.id, ctx.status));
            return (ctx, Outcome::NotStarted);
        }

        let token = cancel.child_token();
        let result = match prepare_task(task, &mut ctx) {
            Ok(prepared) => self.invoke(&prepared, &mut ctx, &token).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(status) => {
                ctx.status = status;
                Outcome::Finished(status)
            }
            Err(e) if e.is_cancellation() => {
                ctx.warn(format!("{}: {}", task.id, e));
                ctx.status = TaskStatus::Cancelled;
                Outcome::Interrupted
            }
            Err(e) => {
                ctx.error(&e);
                ctx.status = TaskStatus::Failed;
                Outcome::Errored
            }
        };

        debug!(status = %ctx.status, "task finished");
        ctx.bus().publish(Message::finished(&task.id, ctx.status));
        (ctx, outcome)
    }

    /// Run the handler until it returns, `token` fires, or the timeout elapses
    async fn invoke(
        &self,
        task: &TaskDefinition,
        ctx: &mut ExecutionContext,
        token: &CancellationToken,
    ) -> ExecutionResult<TaskStatus> {
        let timeout = (task.timeout > 0).then(|| Duration::from_millis(task.timeout));

        tokio::select! {
            biased;
            result = self.handler.run(task, ctx, token) => result,
            _ = token.cancelled() => Err(ExecutionError::Cancelled),
            _ = sleep_for(timeout) => {
                token.cancel();
                Err(ExecutionError::TimedOut(task.timeout))
            }
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Sleep for `duration`, or forever when there is none
async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
