// Leveled logging for the engine.
// Messages go to an installed sink (the host console) or to stderr.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::TransposeError;

/// Environment variable consulted for the default level
pub const LOG_LEVEL_ENV: &str = "PQ_LOG_LEVEL";

/// Severity levels, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl FromStr for LogLevel {
    type Err = TransposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "fatal" => LogLevel::Fatal,
            _ => {
                return Err(TransposeError::invalid_argument(format!(
                    "Invalid log level: {}",
                    s
                )))
            }
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl LogLevel {
    /// Level from `PQ_LOG_LEVEL`, falling back to `Warn`
    pub fn from_env() -> Self {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|value| value.parse::<LogLevel>().ok())
            .unwrap_or(LogLevel::Warn)
    }
}

/// Destination for log lines
pub trait LogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// A clonable leveled logger
#[derive(Clone)]
pub struct Logger {
    sink: Option<Arc<dyn LogSink>>,
    level: LogLevel,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(None, LogLevel::from_env())
    }
}

impl Logger {
    pub fn new(sink: Option<Arc<dyn LogSink>>, level: LogLevel) -> Self {
        Self { sink, level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn with_sink(&self, sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink: Some(sink),
            level: self.level,
        }
    }

    /// Same level, writing to stderr
    pub fn without_sink(&self) -> Self {
        Self {
            sink: None,
            level: self.level,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level <= level
    }

    /// Log a message at the given level
    pub fn log(&self, level: LogLevel, message: &str) {
        match &self.sink {
            Some(sink) => sink.write(level, message),
            None => eprintln!("[pq {}] {}", level, message),
        }
    }

    fn log_with<F, S>(&self, level: LogLevel, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        if self.enabled(level) {
            let message = message_fn();
            self.log(level, message.as_ref());
        }
    }

    /// Log a debug message
    pub fn debug<F, S>(&self, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        self.log_with(LogLevel::Debug, message_fn)
    }

    /// Log an info message
    pub fn info<F, S>(&self, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        self.log_with(LogLevel::Info, message_fn)
    }

    /// Log a warning message
    pub fn warn<F, S>(&self, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        self.log_with(LogLevel::Warn, message_fn)
    }

    /// Log an error message
    pub fn error<F, S>(&self, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        self.log_with(LogLevel::Error, message_fn)
    }

    /// Log a fatal message
    pub fn fatal<F, S>(&self, message_fn: F)
    where
        F: FnOnce() -> S,
        S: AsRef<str>,
    {
        self.log_with(LogLevel::Fatal, message_fn)
    }
}
