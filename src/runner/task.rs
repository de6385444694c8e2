//! Task run behavior
//!
//! This module contains the templating pass applied to a task before it runs
//! and the [`TaskHandler`] that runs it.

use crate::config::TaskDefinition;
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::bus::LogLevel;
use crate::runner::command::ProcessOutput;
use crate::runner::context::{ExecutionContext, TaskStatus};
use crate::runner::interpolate::render;
use crate::runner::value::{Value, Variables};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Prefix of stdout lines that publish a task output
const SET_OUTPUT_PREFIX: &str = "::set-output name=";

/// Runs a prepared task inside its context
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute `task` and report how it ended
    ///
    /// Handlers should observe `cancel` and return
    /// [`ExecutionError::Cancelled`] when it fires.
    async fn run(
        &self,
        task: &TaskDefinition,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult<TaskStatus>;
}

/// Render a task's inputs and script against the context's variables
///
/// Each input is rendered in declaration order and stored both as
/// `inputs.<name>` and in the task's shell environment; the `run` script is
/// rendered last, so it can refer to the inputs. The returned copy carries
/// the rendered script.
pub fn prepare_task(
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
) -> ExecutionResult<TaskDefinition> {
    let mut prepared = task.clone();
    let mut inputs = match ctx.variables.remove("inputs") {
        Some(Value::Map(map)) => map,
        _ => Variables::new(),
    };

    for input in &task.inputs {
        let mut rendered = if input.expression.is_empty() {
            String::new()
        } else {
            render(&input.expression, &ctx.variables)?
        };

        if rendered.is_empty() {
            if let Some(default) = &input.default_value {
                rendered = render(default, &ctx.variables)?;
            }
        }

        if rendered.is_empty() && input.required {
            return Err(ExecutionError::MissingInput {
                task: task.id.clone(),
                name: input.name.clone(),
            });
        }

        if input.input_type.as_deref() == Some("secret") {
            ctx.masker().add(rendered.as_str());
        }

        let value = if rendered.is_empty() {
            Value::Null
        } else {
            Value::from(rendered.as_str())
        };
        inputs.insert(input.name.clone(), value);
        prepared.env.insert(input.name.clone(), rendered);

        // Later inputs and the script see the inputs rendered so far
        ctx.variables
            .insert("inputs".to_string(), Value::Map(inputs.clone()));
    }

    ctx.variables.insert("inputs".to_string(), Value::Map(inputs));
    prepared.run = render(&task.run, &ctx.variables)?;

    Ok(prepared)
}

/// Runs the task's script with its shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTask;

impl ShellTask {
    pub fn new() -> Self {
        ShellTask
    }
}

#[async_trait]
impl TaskHandler for ShellTask {
    async fn run(
        &self,
        task: &TaskDefinition,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult<TaskStatus> {
        if task.run.trim().is_empty() {
            ctx.debug(format!("task '{}' has nothing to run", task.id));
            return Ok(TaskStatus::Completed);
        }

        let services = ctx.services().clone();
        let shell = services.shells().resolve(task.shell.as_deref())?;

        let mut request = shell.request(&task.run);
        request.env = services
            .env()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        request.env.extend(task.env.clone());
        request.cwd = Some(services.working_dir().to_path_buf());

        ctx.log(LogLevel::Command, &task.run);

        let output = services.process().run(request, cancel).await?;
        record_output(ctx, &output);

        if output.success() {
            Ok(TaskStatus::Completed)
        } else {
            ctx.error(ExecutionError::CommandFailed(output.exit_code));
            Ok(TaskStatus::Failed)
        }
    }
}

/// Report a process's streams and store its outputs on the context
fn record_output(ctx: &mut ExecutionContext, output: &ProcessOutput) {
    for line in output.stdout.lines() {
        match parse_set_output(line) {
            Some((key, value)) => ctx.set_output(key, value),
            None => ctx.info(line),
        }
    }
    for line in output.stderr.lines() {
        ctx.warn(line);
    }

    ctx.set_output("stdout", output.stdout.trim_end());
    ctx.set_output("stderr", output.stderr.trim_end());
    ctx.set_output("exit_code", Value::from(output.exit_code));
}

/// Parse `::set-output name=KEY::VALUE`
fn parse_set_output(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim().strip_prefix(SET_OUTPUT_PREFIX)?;
    let (key, value) = rest.split_once("::")?;
    let key = key.trim();
    (!key.is_empty()).then_some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputBlock;
    use crate::runner::context::{Environment, Services};

    fn context() -> ExecutionContext {
        let services = Services::builder()
            .env(Environment::from_pairs([("USER", "ada")]))
            .build();
        ExecutionContext::root(services)
    }

    #[test]
    fn test_prepare_renders_inputs_and_run() {
        let task = TaskDefinition::new("greet")
            .with_input(InputBlock::new("who", "${env.USER}"))
            .with_run("echo hello ${inputs.who} from ${task.name}");
        let root = context();
        let mut ctx = root.child(&task);

        let prepared = prepare_task(&task, &mut ctx).unwrap();

        assert_eq!(prepared.run, "echo hello ada from greet");
        assert_eq!(prepared.env.get("who").map(String::as_str), Some("ada"));
        assert_eq!(task.run, "echo hello ${inputs.who} from ${task.name}");
    }

    #[test]
    fn test_empty_expression_sets_null() {
        let task = TaskDefinition::new("t").with_input(InputBlock::new("opt", ""));
        let mut ctx = context().child(&task);

        prepare_task(&task, &mut ctx).unwrap();
        let value = ctx.get_var("inputs").and_then(|i| i.lookup(["opt"]));
        assert_eq!(value, Some(&Value::Null));
    }

    #[test]
    fn test_default_used_when_empty() {
        let input = InputBlock {
            name: "level".to_string(),
            expression: "${missing_but_null}".to_string(),
            default_value: Some("info".to_string()),
            ..Default::default()
        };
        let task = TaskDefinition::new("t").with_input(input).with_run("log ${inputs.level}");
        let mut ctx = context().child(&task);
        ctx.set_var("missing_but_null", Value::Null);

        let prepared = prepare_task(&task, &mut ctx).unwrap();
        assert_eq!(prepared.run, "log info");
    }

    #[test]
    fn test_required_input_must_render() {
        let input = InputBlock {
            name: "token".to_string(),
            required: true,
            ..Default::default()
        };
        let task = TaskDefinition::new("deploy").with_input(input);
        let mut ctx = context().child(&task);

        let result = prepare_task(&task, &mut ctx);
        assert!(matches!(
            result,
            Err(ExecutionError::MissingInput { task, name }) if task == "deploy" && name == "token"
        ));
    }

    #[test]
    fn test_secret_input_is_masked() {
        let input = InputBlock {
            name: "token".to_string(),
            expression: "s3cr3t".to_string(),
            input_type: Some("secret".to_string()),
            ..Default::default()
        };
        let task = TaskDefinition::new("t").with_input(input);
        let mut ctx = context().child(&task);

        prepare_task(&task, &mut ctx).unwrap();
        assert_eq!(ctx.masker().mask("token=s3cr3t"), "token=***");
    }

    #[test]
    fn test_prepare_twice_is_stable() {
        let task = TaskDefinition::new("t")
            .with_input(InputBlock::new("who", "${env.USER}"))
            .with_run("echo ${inputs.who} ${HOME}");
        let ctx = context().child(&task);

        let mut first_ctx = ctx.child(&task);
        let mut second_ctx = ctx.child(&task);
        let first = prepare_task(&task, &mut first_ctx).unwrap();
        let second = prepare_task(&task, &mut second_ctx).unwrap();
        assert_eq!(first.run, second.run);
    }

    #[test]
    fn test_parse_set_output() {
        assert_eq!(
            parse_set_output("::set-output name=version::1.2.3"),
            Some(("version", "1.2.3"))
        );
        assert_eq!(parse_set_output("::set-output name=::x"), None);
        assert_eq!(parse_set_output("plain line"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_task_records_outputs() {
        let task = TaskDefinition::new("t")
            .with_shell("sh")
            .with_run("echo building; echo '::set-output name=version::1.0'");
        let mut ctx = context().child(&task);

        let status = ShellTask::new()
            .run(&task, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(ctx.outputs.get("version"), Some(&Value::from("1.0")));
        assert_eq!(ctx.outputs.get("exit_code"), Some(&Value::from(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_task_failure_status() {
        let task = TaskDefinition::new("t").with_shell("sh").with_run("exit 4");
        let mut ctx = context().child(&task);

        let status = ShellTask::new()
            .run(&task, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(ctx.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_shell_task_unknown_shell() {
        let task = TaskDefinition::new("t").with_shell("fish").with_run("echo");
        let mut ctx = context().child(&task);

        let result = ShellTask::new()
            .run(&task, &mut ctx, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExecutionError::UnknownShell(_))));
    }
}
