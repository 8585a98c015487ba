//! Host console output

use std::sync::Arc;

use parking_lot::Mutex;
use pq_core::{LogLevel, LogSink};

/// Where command output and errors are printed
pub trait HostConsole: Send + Sync {
    fn display(&self, message: &str);
    fn error(&self, message: &str);
}

/// Routes engine log lines to a host console
pub struct ConsoleSink(pub Arc<dyn HostConsole>);

impl LogSink for ConsoleSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug | LogLevel::Info => self.0.display(message),
            LogLevel::Warn => self.0.display(&format!("Warning: {}", message)),
            LogLevel::Error | LogLevel::Fatal => self.0.error(message),
        }
    }
}

/// Console that keeps every line in memory
#[derive(Debug, Default)]
pub struct BufferConsole {
    displayed: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn displayed(&self) -> Vec<String> {
        self.displayed.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl HostConsole for BufferConsole {
    fn display(&self, message: &str) {
        self.displayed.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}
