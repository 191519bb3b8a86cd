//! Injected log sink
//!
//! Components receive a [`SharedLog`] instead of calling global log functions.
//! The default sink forwards to `tracing`; [`MemorySink`] keeps entries in
//! memory so tests can assert on what was reported.

use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, component: &'static str, message: &str);

    fn debug(&self, component: &'static str, message: &str) {
        self.log(LogLevel::Debug, component, message);
    }

    fn info(&self, component: &'static str, message: &str) {
        self.log(LogLevel::Info, component, message);
    }

    fn warn(&self, component: &'static str, message: &str) {
        self.log(LogLevel::Warn, component, message);
    }

    fn error(&self, component: &'static str, message: &str) {
        self.log(LogLevel::Error, component, message);
    }
}

pub type SharedLog = Arc<dyn LogSink>;

/// Forwards every entry to the `tracing` macros
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, component: &'static str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(component, "{}", message),
            LogLevel::Info => tracing::info!(component, "{}", message),
            LogLevel::Warn => tracing::warn!(component, "{}", message),
            LogLevel::Error => tracing::error!(component, "{}", message),
        }
    }
}

pub fn tracing_sink() -> SharedLog {
    Arc::new(TracingSink)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub component: &'static str,
    pub message: String,
}

/// Captures entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries().iter().filter(|e| e.level == level).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, component: &'static str, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                component,
                message: message.to_string(),
            });
        }
    }
}
