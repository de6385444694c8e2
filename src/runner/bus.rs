//! Message bus and reporting sinks
//!
//! The runner never writes to a terminal itself. Everything it has to say is
//! published as a [`Message`] and fanned out to the subscribed [`Sink`]s.

use crate::runner::context::TaskStatus;
use colored::Colorize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// A command about to be executed
    Command,
    Debug,
    Error,
    Warning,
    Info,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Command => "RUN",
            LogLevel::Debug => "DEBUG",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(label)
    }
}

/// An event reported during a run
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TaskStarted { task: String },
    TaskFinished { task: String, status: TaskStatus },
    Error { message: String },
    Log { text: String, level: LogLevel },
}

impl Message {
    pub fn started(task: impl Into<String>) -> Self {
        Message::TaskStarted { task: task.into() }
    }

    pub fn finished(task: impl Into<String>, status: TaskStatus) -> Self {
        Message::TaskFinished {
            task: task.into(),
            status,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Message::Error {
            message: message.to_string(),
        }
    }

    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        Message::Log {
            text: text.into(),
            level,
        }
    }
}

/// A consumer of bus messages
pub trait Sink: Send + Sync {
    /// Handle a message; returning `false` stops delivery to later sinks
    fn receive(&self, message: &Message) -> bool;
}

/// Fan-out channel shared by every context of a run
#[derive(Default)]
pub struct MessageBus {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink after the existing ones
    pub fn subscribe(&self, sink: Arc<dyn Sink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Deliver a message to the sinks in subscription order
    pub fn publish(&self, message: Message) {
        // Sinks may subscribe while handling a message
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            if !sink.receive(&message) {
                break;
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("sinks", &self.sink_count())
            .finish()
    }
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn receive(&self, message: &Message) -> bool {
        match message {
            Message::TaskStarted { task } => tracing::info!(task = %task, "task started"),
            Message::TaskFinished { task, status } => {
                tracing::info!(task = %task, status = %status, "task finished")
            }
            Message::Error { message } => tracing::error!("{}", message),
            Message::Log { text, level } => match level {
                LogLevel::Error => tracing::error!("{}", text),
                LogLevel::Warning => tracing::warn!("{}", text),
                LogLevel::Info | LogLevel::Command => tracing::info!("{}", text),
                LogLevel::Debug => tracing::debug!("{}", text),
                LogLevel::Trace => tracing::trace!("{}", text),
            },
        }
        true
    }
}

/// Verbosity levels for console output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

/// Renders messages on stderr
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    verbosity: Verbosity,
}

impl ConsoleSink {
    pub fn new(verbosity: Verbosity) -> Self {
        ConsoleSink { verbosity }
    }

    /// The line to print for a message, if any at this verbosity
    pub fn render(&self, message: &Message) -> Option<String> {
        let v = self.verbosity;
        match message {
            Message::TaskStarted { task } if v >= Verbosity::Normal => {
                Some(format!("{} {}", "[TASK]".cyan().bold(), task))
            }
            Message::TaskFinished { task, status } => {
                let line = match status {
                    TaskStatus::Completed if v >= Verbosity::Verbose => {
                        format!("{} {}", "[DONE]".green(), task)
                    }
                    TaskStatus::Skipped if v >= Verbosity::Normal => {
                        format!("{} {}", "[SKIP]".yellow(), task)
                    }
                    TaskStatus::Failed if v >= Verbosity::Quiet => {
                        format!("{} {}", "[FAIL]".red().bold(), task)
                    }
                    TaskStatus::Cancelled if v >= Verbosity::Quiet => {
                        format!("{} {}", "[CANCELLED]".magenta(), task)
                    }
                    _ => return None,
                };
                Some(line)
            }
            Message::Error { message } if v >= Verbosity::Quiet => {
                Some(format!("{} {}", "[ERROR]".red().bold(), message))
            }
            Message::Log { text, level } => {
                let min = match level {
                    LogLevel::Error => Verbosity::Quiet,
                    LogLevel::Warning | LogLevel::Info | LogLevel::Command => Verbosity::Normal,
                    LogLevel::Debug | LogLevel::Trace => Verbosity::Verbose,
                };
                if v < min {
                    return None;
                }
                let label = format!("[{}]", level);
                let label = match level {
                    LogLevel::Error => label.red(),
                    LogLevel::Warning => label.yellow(),
                    LogLevel::Command => label.blue(),
                    _ => label.dimmed(),
                };
                Some(format!("{} {}", label, text))
            }
            _ => None,
        }
    }
}

impl Sink for ConsoleSink {
    fn receive(&self, message: &Message) -> bool {
        if let Some(line) = self.render(message) {
            eprintln!("{}", line);
        }
        true
    }
}

/// Records every message, for tests and post-run inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Message>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Final status reported for each task, in report order
    pub fn finished(&self) -> Vec<(String, TaskStatus)> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::TaskFinished { task, status } => Some((task, status)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn receive(&self, message: &Message) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gate;

    impl Sink for Gate {
        fn receive(&self, message: &Message) -> bool {
            !matches!(message, Message::Log { level: LogLevel::Trace, .. })
        }
    }

    #[test]
    fn test_publish_reaches_all_sinks() {
        let bus = MessageBus::new();
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.publish(Message::started("build"));

        assert_eq!(first.messages(), vec![Message::started("build")]);
        assert_eq!(second.messages(), vec![Message::started("build")]);
    }

    #[test]
    fn test_sink_can_stop_delivery() {
        let bus = MessageBus::new();
        let after = Arc::new(MemorySink::new());
        bus.subscribe(Arc::new(Gate));
        bus.subscribe(after.clone());

        bus.publish(Message::log(LogLevel::Trace, "noise"));
        bus.publish(Message::log(LogLevel::Info, "kept"));

        assert_eq!(after.messages(), vec![Message::log(LogLevel::Info, "kept")]);
    }

    /// Subscribes a recorder the first time it sees a message
    struct Chain {
        bus: Arc<MessageBus>,
        late: Arc<MemorySink>,
    }

    impl Sink for Chain {
        fn receive(&self, _message: &Message) -> bool {
            if self.bus.sink_count() == 1 {
                self.bus.subscribe(self.late.clone());
            }
            true
        }
    }

    #[test]
    fn test_sink_can_subscribe_while_receiving() {
        let bus = Arc::new(MessageBus::new());
        let late = Arc::new(MemorySink::new());
        bus.subscribe(Arc::new(Chain {
            bus: bus.clone(),
            late: late.clone(),
        }));

        bus.publish(Message::started("first"));
        bus.publish(Message::started("second"));

        assert_eq!(bus.sink_count(), 2);
        assert_eq!(late.messages(), vec![Message::started("second")]);
    }

    #[test]
    fn test_console_respects_verbosity() {
        colored::control::set_override(false);

        let quiet = ConsoleSink::new(Verbosity::Quiet);
        assert_eq!(quiet.render(&Message::started("a")), None);
        assert_eq!(
            quiet.render(&Message::finished("a", TaskStatus::Failed)),
            Some("[FAIL] a".to_string())
        );

        let verbose = ConsoleSink::new(Verbosity::Verbose);
        assert_eq!(
            verbose.render(&Message::log(LogLevel::Debug, "details")),
            Some("[DEBUG] details".to_string())
        );

        let silent = ConsoleSink::new(Verbosity::Silent);
        assert_eq!(silent.render(&Message::error("boom")), None);
    }

    #[test]
    fn test_memory_sink_helpers() {
        let sink = MemorySink::new();
        sink.receive(&Message::finished("a", TaskStatus::Completed));
        sink.receive(&Message::error("bad"));

        assert_eq!(sink.finished(), vec![("a".to_string(), TaskStatus::Completed)]);
        assert_eq!(sink.errors(), vec!["bad".to_string()]);
    }
}
