//! Time and Logging Abstractions
//!
//! Provides an injectable time source (cache TTLs are measured against it) and
//! a logging sink for forwarding structured logs to the host.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

/// Time source trait
///
/// Abstracts system time so cache expiry can be tested without sleeping.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn is_stale(clock: &dyn Clock, inserted: DateTime<Utc>, ttl: chrono::Duration) -> bool {
///     clock.now() - inserted > ttl
/// }
/// ```
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Used by tests that exercise TTL expiry.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    /// Structured fields recorded on the event
    pub fields: HashMap<String, String>,
    /// Name of the enclosing span, if any
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Receives every event that passes the tracing filter, for hosts that keep
/// their own log pipeline (a rolling file, an in-app debug console).
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Entries below this level are dropped before `log` is called.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}
