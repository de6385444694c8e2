//! Shell command execution
//!
//! This module resolves shell names to interpreters and runs scripts as
//! child processes.

use crate::error::{ExecutionError, ExecutionResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A process to launch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// What a finished process produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches processes on behalf of tasks
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, or until `cancel` fires
    async fn run(
        &self,
        request: ProcessRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult<ProcessOutput>;
}

/// Runs processes with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        TokioProcessRunner
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        request: ProcessRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let mut command = TokioCommand::new(&request.program);
        command.args(&request.args);
        command.envs(&request.env);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        // Dropping the wait future on cancellation kills the child
        command.kill_on_drop(true);

        debug!(program = %request.program, args = ?request.args, "spawning process");

        let child = command.spawn().map_err(|e| ExecutionError::Spawn {
            program: request.program.clone(),
            error: e.to_string(),
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| ExecutionError::Spawn {
                program: request.program.clone(),
                error: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// How to hand a script to an interpreter
#[derive(Debug, Clone, PartialEq)]
pub struct Shell {
    pub program: String,

    /// Arguments placed before the script text
    pub args: Vec<String>,
}

impl Shell {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Shell {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the request that runs `script` with this shell
    pub fn request(&self, script: &str) -> ProcessRequest {
        let mut args = self.args.clone();
        args.push(script.to_string());
        ProcessRequest {
            program: self.program.clone(),
            args,
            ..Default::default()
        }
    }
}

/// Shell name to interpreter mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ShellRegistry {
    shells: BTreeMap<String, Shell>,
    default_shell: String,
}

impl ShellRegistry {
    /// A registry with no shells
    pub fn empty(default_shell: impl Into<String>) -> Self {
        ShellRegistry {
            shells: BTreeMap::new(),
            default_shell: default_shell.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, shell: Shell) {
        self.shells.insert(name.into(), shell);
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_shell = name.into();
    }

    pub fn default_shell(&self) -> &str {
        &self.default_shell
    }

    pub fn get(&self, name: &str) -> Option<&Shell> {
        self.shells.get(name)
    }

    /// Resolve a task's shell, falling back to the default
    pub fn resolve(&self, name: Option<&str>) -> ExecutionResult<&Shell> {
        let name = name.unwrap_or(&self.default_shell);
        self.get(name)
            .ok_or_else(|| ExecutionError::UnknownShell(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shells.keys().map(String::as_str)
    }
}

impl Default for ShellRegistry {
    fn default() -> Self {
        let default_shell = if cfg!(windows) { "pwsh" } else { "sh" };
        let mut registry = ShellRegistry::empty(default_shell);

        registry.register("sh", Shell::new("sh", ["-e", "-c"]));
        registry.register(
            "bash",
            Shell::new("bash", ["--noprofile", "--norc", "-e", "-o", "pipefail", "-c"]),
        );
        registry.register("zsh", Shell::new("zsh", ["-e", "-c"]));
        registry.register(
            "pwsh",
            Shell::new("pwsh", ["-NoLogo", "-NoProfile", "-NonInteractive", "-Command"]),
        );
        registry.register(
            "powershell",
            Shell::new(
                "powershell",
                ["-NoLogo", "-NoProfile", "-NonInteractive", "-Command"],
            ),
        );
        registry.register("cmd", Shell::new("cmd", ["/D", "/C"]));
        registry.register(
            "python",
            Shell::new(if cfg!(windows) { "python" } else { "python3" }, ["-c"]),
        );
        registry.register("node", Shell::new("node", ["-e"]));

        registry
    }
}
