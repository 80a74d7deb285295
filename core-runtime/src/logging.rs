//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with the `tracing` crate, supporting:
//! - JSON, pretty and compact output formats
//! - Module-level filtering through `EnvFilter`
//! - Integration with host logging via `LoggerSink`
//! - Span contexts for refresh sessions
//!
//! ## Overview
//!
//! This module configures the `tracing-subscriber` infrastructure and mirrors
//! events into a host-provided [`LoggerSink`] when one is configured. Every
//! event that survives filtering still flows through the standard `tracing`
//! layers.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LoggingConfig::default()
//!         .with_format(LogFormat::Pretty)
//!         .with_level(LogLevel::Debug);
//!
//!     init_logging(config).expect("Failed to initialize logging");
//!
//!     tracing::info!("Chart refresh service started");
//! }
//! ```

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Crates whose events are governed by [`LoggingConfig::level`] when no custom
/// filter is supplied.
const WORKSPACE_TARGETS: &[&str] = &[
    "chart_core_workspace",
    "core_runtime",
    "core_metadata",
    "core_ranking",
    "core_service",
    "bridge_desktop",
];

/// HTTP stack crates kept at `warn` under the default filter.
const QUIET_TARGETS: &[&str] = &["h2", "hyper", "reqwest"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum log level
    pub level: LogLevel,
    /// Custom filter string (e.g., "core_ranking=debug,core_metadata=trace")
    pub filter: Option<String>,
    /// Optional logger sink for forwarding logs to host
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Emit span enter/exit events
    pub enable_spans: bool,
    /// Display target module in logs
    pub display_target: bool,
    /// Display thread info
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"))
            .field("enable_spans", &self.enable_spans)
            .finish()
    }
}

impl LoggingConfig {
    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set minimum log level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set custom filter string
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set logger sink for host integration
    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Enable or disable span events
    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    /// Enable or disable target display
    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    /// Enable or disable thread info
    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Install the global subscriber described by `config`.
///
/// Call once at startup. A second call fails because a global subscriber is
/// already set.
///
/// # Errors
///
/// [`Error::Config`] when the filter does not parse or a subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let output = output_layer(&config);

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .with(LoggerSinkLayer::new(config.logger_sink))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(config: &LoggingConfig) -> BoxedLayer {
    let span_events = if config.enable_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => base.pretty().with_span_events(span_events).boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = level_name(config.level);
            WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, level))
                .chain(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(directives).map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Layer that forwards events to a `LoggerSink` implementation.
///
/// Inside a tokio runtime the sink call is spawned; outside one it is driven
/// to completion on the calling thread.
pub struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    pub fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());

        if level < sink.min_level() {
            return;
        }

        let mut visitor = SinkVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        let mut entry = LogEntry::new(level, metadata.target(), message);

        for (key, value) in visitor.fields {
            entry = entry.with_field(key, value);
        }

        if let Some(span) = ctx.lookup_current() {
            entry.span_id = Some(span.name().to_string());
        }

        let sink = Arc::clone(sink);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
            return;
        }

        if let Err(err) = futures::executor::block_on(sink.log(entry)) {
            eprintln!("LoggerSink error: {}", err);
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for SinkVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Strip full file paths to basename only
///
/// Used when logging which chart source candidate was picked:
///
/// ```ignore
/// use tracing::info;
/// use core_runtime::logging::strip_path;
///
/// let path = "/Users/jo/charts/docs/kworb_top10.json";
/// info!(file = %strip_path(path), "Loaded local chart");
/// // Logs: file="kworb_top10.json"
/// ```
pub fn strip_path(path: &str) -> &str {
    path.rsplit('/')
        .next()
        .unwrap_or(path)
        .rsplit('\\')
        .next()
        .unwrap_or(path)
}
