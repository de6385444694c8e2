//! Main CLI application

use crate::config::{find_task_file, parse_task_file, validate_tasks, TaskFile};
use crate::runner::{
    ConsoleSink, Environment, MessageBus, RunOptions, Runner, Services, ShellRegistry,
    TracingSink, Verbosity,
};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter
const LOG_ENV: &str = "PLANK_LOG";

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("plank")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run tasks from a planktasks.yaml file")
        .arg(
            Arg::new("targets")
                .value_name("TASK")
                .help("Tasks to run, in order")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to the task file (default: ./planktasks.yaml or ./planktasks.yml)"),
        )
        .arg(
            Arg::new("skip-deps")
                .long("skip-deps")
                .help("Run only the named tasks, not their dependencies")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .help("List the tasks in the task file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .help("Print a shell completion script")
                .value_parser(value_parser!(Shell)),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print failures and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Install the tracing subscriber; `PLANK_LOG` overrides the verbosity flags
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbosity >= Verbosity::Verbose {
            "plank=debug"
        } else {
            "warn"
        })
    });

    // A subscriber may already be installed when running in-process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Directory tasks run in: the task file's directory
fn working_dir_for(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Assemble the services for a run of `file`
fn build_services(file: &TaskFile, path: &Path, verbosity: Verbosity) -> anyhow::Result<Services> {
    let working_dir = working_dir_for(path);

    let mut environment = Environment::from_process();
    let dotenv = working_dir.join(".env");
    if dotenv.is_file() {
        let loaded = environment
            .load_dotenv(&dotenv)
            .with_context(|| format!("failed to load {}", dotenv.display()))?;
        debug!(path = %dotenv.display(), loaded, "loaded environment file");
    }

    let mut shells = ShellRegistry::default();
    if let Some(shell) = &file.shell {
        shells.set_default(shell.as_str());
    }

    let bus = Arc::new(MessageBus::new());
    bus.subscribe(Arc::new(ConsoleSink::new(verbosity)));
    if env::var_os(LOG_ENV).is_some() {
        bus.subscribe(Arc::new(TracingSink));
    }

    Ok(Services::builder()
        .env(environment)
        .shells(shells)
        .bus(bus)
        .working_dir(working_dir)
        .build())
}

/// Print the tasks of a task file
fn print_tasks(file: &TaskFile) {
    if let Some(name) = &file.name {
        println!("{}", name.bold());
    }

    for task in &file.tasks {
        let mut line = format!("  {}", task.name.green().bold());
        if task.id != task.name {
            line.push_str(&format!(" ({})", task.id));
        }
        if let Some(description) = &task.description {
            line.push_str(&format!("  {}", description));
        }
        println!("{}", line);

        if !task.dependencies.is_empty() {
            println!("      {} {}", "needs:".dimmed(), task.dependencies.join(", "));
        }
    }
}

/// Run the CLI with the process arguments; returns the exit code
pub async fn run() -> anyhow::Result<i32> {
    run_from(env::args_os()).await
}

/// Run the CLI with explicit arguments; returns the exit code
pub async fn run_from<I, T>(args: I) -> anyhow::Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = build_command();
    let matches = command.clone().get_matches_from(args);

    if let Some(shell) = matches.get_one::<Shell>("completions") {
        clap_complete::generate(*shell, &mut command, "plank", &mut io::stdout());
        return Ok(0);
    }

    let verbosity = get_verbosity(&matches);
    init_tracing(verbosity);

    let path = match matches.get_one::<String>("file") {
        Some(file) => PathBuf::from(file),
        None => find_task_file()?,
    };
    let file = parse_task_file(&path).with_context(|| format!("failed to load {}", path.display()))?;
    validate_tasks(&file.tasks)?;

    if matches.get_flag("list") {
        print_tasks(&file);
        return Ok(0);
    }

    let targets: Vec<String> = matches
        .get_many::<String>("targets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    if targets.is_empty() {
        command.print_help()?;
        println!();
        return Ok(0);
    }

    let services = build_services(&file, &path, verbosity)?;
    let options = RunOptions::new(targets).skip_dependencies(matches.get_flag("skip-deps"));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let runner = Runner::new(services);
    let result = runner.run(&file.tasks, &options, None, &cancel).await;
    cancel.cancel();

    Ok(result.exit_code())
}
