//! Rate-limited asynchronous logging.
//!
//! Every worker in the pipeline shares one log channel. A single logger
//! worker consumes structured [`LogEvent`]s from that channel, formats each
//! event once, and offers the formatted line to every sink. Sink 0 is the
//! process console; further sinks are outbound string channels registered
//! through the graph builder. Each sink has an independent token-bucket
//! rate limiter so one chatty stage cannot drown the others (see
//! [`limiter::TokenBucket`]).
//!
//! The logger's tunables live in the config store under `log_*` keys, so a
//! running pipeline can be re-tuned from the master config like any other
//! stage.

pub mod limiter;
mod worker;

pub use worker::{
    CFG_LEVELS, CFG_PRINT_TO_SCREEN, CFG_RATE_LIMITS, CFG_REJECTIONS, Logger,
};

use chrono::{DateTime, Local};

/// Timestamp layout used in formatted log lines.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Severity of a log event. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Log = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    /// Three-letter tag used in formatted output.
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "ERR",
            LogLevel::Log => "LOG",
            LogLevel::Info => "INF",
            LogLevel::Debug => "DEB",
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`LogLevel::index`]; out-of-range values clamp to `Debug`.
    pub fn from_index(value: u8) -> Self {
        match value {
            0 => LogLevel::Error,
            1 => LogLevel::Log,
            2 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// One structured diagnostic message.
///
/// The timestamp is assigned when the event is emitted, not when the
/// logger gets around to formatting it.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub sender: String,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogEvent {
    pub fn new(level: LogLevel, sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            sender: sender.into(),
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

/// Format an event as `TAG:(MM/DD/YYYY HH:MM:SS) [sender] message`.
pub fn format_event(event: &LogEvent) -> String {
    format!(
        "{}:({}) [{}] {}",
        event.level.tag(),
        event.timestamp.format(TIMESTAMP_FORMAT),
        event.sender,
        event.message
    )
}

/// A cheap handle for emitting log events, pre-tagged with a sender name.
///
/// Emission never blocks. If the log channel itself is unusable the event
/// is written straight to stderr rather than lost silently.
#[derive(Clone)]
pub struct LogSender {
    tx: flume::Sender<LogEvent>,
    sender: String,
}

impl LogSender {
    pub(crate) fn new(tx: flume::Sender<LogEvent>, sender: impl Into<String>) -> Self {
        Self {
            tx,
            sender: sender.into(),
        }
    }

    /// A handle for another component, sharing the same channel.
    pub fn named(&self, sender: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            sender: sender.into(),
        }
    }

    pub fn sender_name(&self) -> &str {
        &self.sender
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::new(level, self.sender.clone(), message);
        if let Err(e) = self.tx.try_send(event) {
            eprintln!(
                "!!!({}) [LOG_QUEUE_ERROR@{}] {e} while sending msg",
                Local::now().format(TIMESTAMP_FORMAT),
                self.sender
            );
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(LogLevel::Log, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message);
    }
}
