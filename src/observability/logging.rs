//! Structured logging.
//!
//! # Responsibilities
//! - Build the process logger from [`LogConfig`]
//! - Format leveled records with timestamp, call site and key-value fields
//! - Hand records to a sink (stdout or a rotating file)
//!
//! # Record Layout
//! ```text
//! 2024-05-01 12:00:00.123	INFO	config/watcher.rs:88	config reloaded	path=/etc/svc.yaml generation=3
//! ^ timestamp             ^ level ^ caller              ^ message        ^ fields, in call order
//! ```
//!
//! # Design Decisions
//! - Uses tracing/tracing-subscriber; the logger owns its own `Dispatch`
//! - Initialized once per process; components get a cloned [`Logger`]
//! - Caller location comes from `#[track_caller]`, so it names the code
//!   that called `info`/`error`, not this module
//! - Sink write failures are dropped by the fmt layer and never reach callers

use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::panic::Location;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher::{self, Dispatch, SetGlobalDefaultError};
use tracing::field::Visit;
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{ChronoLocal, FormatTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::schema::LogConfig;
use crate::observability::sink::{RotatingFileSink, RotationPolicy};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Event field carrying the call site captured by [`Logger`].
const CALLER_KEY: &str = "caller";

/// Event field carrying pre-rendered [`Field`]s.
const FIELDS_KEY: &str = "log.fields";

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Error type for logger setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("logger already initialized")]
    AlreadyInitialized,

    #[error("failed to install global subscriber: {0}")]
    SetGlobal(#[from] SetGlobalDefaultError),
}

/// A key-value pair attached to a record.
///
/// Fields are emitted in the order given; repeated keys are all emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    key: Cow<'static, str>,
    value: String,
}

impl Field {
    /// Field rendered with the value's `Display`.
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Field rendered with the value's `Debug`.
    pub fn debug(key: impl Into<Cow<'static, str>>, value: impl fmt::Debug) -> Self {
        Self {
            key: key.into(),
            value: format!("{value:?}"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

struct Fields<'a>(&'a [Field]);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write_pair(f, &field.key, &field.value)?;
        }
        Ok(())
    }
}

/// Writes `key=value`, quoting values that would break the line apart.
fn write_pair(out: &mut impl fmt::Write, key: &str, value: &str) -> fmt::Result {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"');
    if needs_quotes {
        write!(out, "{key}={value:?}")
    } else {
        write!(out, "{key}={value}")
    }
}

/// Writes the message column, escaping it when it would span lines or
/// columns.
fn write_message(out: &mut impl fmt::Write, message: &str) -> fmt::Result {
    if message.contains(['\n', '\r', '\t']) {
        write!(out, "{message:?}")
    } else {
        out.write_str(message)
    }
}

/// `src/config/watcher.rs` becomes `config/watcher.rs`.
fn short_caller(file: &str, line: u32) -> String {
    let file = file.replace('\\', "/");
    let short = match file.rmatch_indices('/').nth(1) {
        Some((idx, _)) => &file[idx + 1..],
        None => file.as_str(),
    };
    format!("{short}:{line}")
}

/// Process logger handle.
///
/// Cheap to clone; every clone writes through the same subscriber.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    level: LevelFilter,
}

impl Logger {
    /// Build the process logger and install it as the global default.
    ///
    /// Writes to `config.filename` with rotation, or stdout when unset.
    /// Only the first call succeeds.
    pub fn init(config: &LogConfig) -> Result<Self, LoggingError> {
        if GLOBAL.get().is_some() {
            return Err(LoggingError::AlreadyInitialized);
        }

        let logger = match &config.filename {
            Some(path) => {
                let sink = RotatingFileSink::open(path, RotationPolicy::from(config))?;
                Self::with_writer(config, sink)
            }
            None => Self::with_writer(config, std::io::stdout),
        };

        GLOBAL
            .set(logger.clone())
            .map_err(|_| LoggingError::AlreadyInitialized)?;
        dispatcher::set_global_default(logger.dispatch.clone())?;

        Ok(logger)
    }

    /// The logger installed by [`Logger::init`], if any.
    pub fn global() -> Option<&'static Logger> {
        GLOBAL.get()
    }

    /// Build a logger over any sink without installing it globally.
    pub fn with_writer<W>(config: &LogConfig, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let level = LevelFilter::from(config.level);
        let subscriber = tracing_subscriber::registry().with(build_filter(level)).with(
            tracing_subscriber::fmt::layer()
                .event_format(RecordFormat::new())
                .with_writer(writer),
        );

        Self {
            dispatch: Dispatch::new(subscriber),
            level,
        }
    }

    /// Minimum level this logger emits.
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Whether a record at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    #[track_caller]
    pub fn debug(&self, message: &str, fields: &[Field]) {
        self.emit(Level::DEBUG, Location::caller(), message, fields);
    }

    #[track_caller]
    pub fn info(&self, message: &str, fields: &[Field]) {
        self.emit(Level::INFO, Location::caller(), message, fields);
    }

    #[track_caller]
    pub fn warn(&self, message: &str, fields: &[Field]) {
        self.emit(Level::WARN, Location::caller(), message, fields);
    }

    #[track_caller]
    pub fn error(&self, message: &str, fields: &[Field]) {
        self.emit(Level::ERROR, Location::caller(), message, fields);
    }

    /// Error record whose message is `err`, followed by `meta` and, when the
    /// error has one, its `cause` chain.
    #[track_caller]
    pub fn log_error(&self, err: &dyn std::error::Error, meta: &[Field]) {
        let location = Location::caller();
        if !self.enabled(Level::ERROR) {
            return;
        }

        let mut fields = meta.to_vec();
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        if !causes.is_empty() {
            fields.push(Field::new("cause", causes.join(": ")));
        }

        self.emit(Level::ERROR, location, &err.to_string(), &fields);
    }

    /// Info record with contextual metadata.
    #[track_caller]
    pub fn log_info(&self, message: &str, meta: &[Field]) {
        self.emit(Level::INFO, Location::caller(), message, meta);
    }

    fn emit(&self, level: Level, location: &Location<'_>, message: &str, fields: &[Field]) {
        if !self.enabled(level) {
            return;
        }

        let caller = short_caller(location.file(), location.line());
        let fields = Fields(fields);

        dispatcher::with_default(&self.dispatch, || {
            if level == Level::ERROR {
                tracing::error!(caller = %caller, log.fields = %fields, "{}", message);
            } else if level == Level::WARN {
                tracing::warn!(caller = %caller, log.fields = %fields, "{}", message);
            } else if level == Level::INFO {
                tracing::info!(caller = %caller, log.fields = %fields, "{}", message);
            } else if level == Level::DEBUG {
                tracing::debug!(caller = %caller, log.fields = %fields, "{}", message);
            } else {
                tracing::trace!(caller = %caller, log.fields = %fields, "{}", message);
            }
        });
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

/// Configured level for our records; chatty dependencies capped at `warn`.
fn build_filter(level: LevelFilter) -> EnvFilter {
    let cap = level.min(LevelFilter::WARN);
    EnvFilter::new(format!("{level},hyper={cap},h2={cap},notify={cap}"))
}

/// One tab-separated line per event.
struct RecordFormat {
    timer: ChronoLocal,
}

impl RecordFormat {
    fn new() -> Self {
        Self {
            timer: ChronoLocal::new(TIMESTAMP_FORMAT.to_string()),
        }
    }
}

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut record = RecordVisitor::default();
        event.record(&mut record);

        // Plain `tracing::info!` calls carry no caller field.
        let caller = record.caller.take().unwrap_or_else(|| {
            short_caller(meta.file().unwrap_or("unknown"), meta.line().unwrap_or(0))
        });

        self.timer.format_time(&mut writer)?;
        write!(writer, "\t{}\t{}\t", meta.level(), caller)?;
        write_message(&mut writer, &record.message)?;
        if !record.fields.is_empty() {
            write!(writer, "\t{}", record.fields)?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    caller: Option<String>,
    fields: String,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_owned(),
            CALLER_KEY => self.caller = Some(value.to_owned()),
            name => {
                if name != FIELDS_KEY {
                    if !self.fields.is_empty() {
                        self.fields.push(' ');
                    }
                    let _ = write_pair(&mut self.fields, name, value);
                } else if !value.is_empty() {
                    if !self.fields.is_empty() {
                        self.fields.push(' ');
                    }
                    self.fields.push_str(value);
                }
            }
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;
    use crate::observability::sink::BufferSink;

    fn logger(level: LogLevel) -> (Logger, BufferSink) {
        let sink = BufferSink::new();
        let config = LogConfig {
            level,
            ..LogConfig::default()
        };
        (Logger::with_writer(&config, sink.clone()), sink)
    }

    fn columns(line: &str) -> Vec<&str> {
        line.split('\t').collect()
    }

    #[test]
    fn info_level_drops_debug() {
        let (logger, sink) = logger(LogLevel::Info);

        logger.debug("hidden", &[]);
        assert!(sink.lines().is_empty());

        logger.info("shown", &[]);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(columns(&lines[0])[1], "INFO");
    }

    #[test]
    fn record_layout() {
        let (logger, sink) = logger(LogLevel::Debug);

        logger.debug("request", &[Field::new("status", 200), Field::new("path", "/a")]);

        let line = &sink.lines()[0];
        let cols = columns(line);
        assert_eq!(cols.len(), 5);
        assert!(chrono::NaiveDateTime::parse_from_str(cols[0], TIMESTAMP_FORMAT).is_ok());
        assert_eq!(cols[1], "DEBUG");
        assert!(cols[2].starts_with("observability/logging.rs:"), "{}", cols[2]);
        assert_eq!(cols[3], "request");
        assert_eq!(cols[4], "status=200 path=/a");
    }

    #[test]
    fn empty_fields_render_message_only() {
        let (logger, sink) = logger(LogLevel::Info);
        logger.info("bare", &[]);
        assert_eq!(columns(&sink.lines()[0]).len(), 4);
    }

    #[test]
    fn duplicate_keys_are_kept_in_order() {
        let (logger, sink) = logger(LogLevel::Info);
        logger.info(
            "dup",
            &[Field::new("k", 1), Field::new("other", "x"), Field::new("k", 2)],
        );
        assert!(sink.contents().contains("k=1 other=x k=2"));
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let (logger, sink) = logger(LogLevel::Info);
        logger.info(
            "quoted",
            &[
                Field::new("ua", "curl/8.0 (x86_64)"),
                Field::new("query", ""),
                Field::debug("cost", std::time::Duration::from_millis(5)),
            ],
        );
        assert!(sink
            .contents()
            .contains(r#"ua="curl/8.0 (x86_64)" query="" cost=5ms"#));
    }

    #[test]
    fn log_error_carries_message_meta_and_cause() {
        let (logger, sink) = logger(LogLevel::Info);
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = crate::config::loader::ConfigError::Io {
            path: "/etc/svc.yaml".into(),
            source: inner,
        };

        logger.log_error(&err, &[Field::new("op", "reload")]);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let cols = columns(&lines[0]);
        assert_eq!(cols[1], "ERROR");
        assert!(cols[3].contains("/etc/svc.yaml"));
        assert_eq!(cols[4], "op=reload cause=missing");
    }

    #[test]
    fn multi_line_messages_stay_on_one_line() {
        use crate::config::loader::{parse_config, ConfigFormat};

        let (logger, sink) = logger(LogLevel::Info);
        let err = parse_config("[app\nname=", ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains('\n'));

        logger.log_error(&err, &[Field::new("op", "reload")]);
        logger.info("tab\tand\nnewline", &[]);

        let lines = sink.lines();
        assert_eq!(lines.len(), 2, "{lines:?}");
        let cols = columns(&lines[0]);
        assert_eq!(cols.len(), 5);
        assert!(cols[3].starts_with("\"Parse error: "));
        assert!(cols[3].contains("\\n"));
        assert_eq!(cols[4], "op=reload");
        assert_eq!(columns(&lines[1])[3], r#""tab\tand\nnewline""#);
    }

    #[test]
    fn log_info_uses_info_level() {
        let (logger, sink) = logger(LogLevel::Info);
        logger.log_info("started", &[Field::new("port", 8080)]);
        let line = &sink.lines()[0];
        assert_eq!(columns(line)[1], "INFO");
        assert!(line.ends_with("port=8080"));
    }

    #[test]
    fn error_level_drops_log_error_below() {
        let (logger, sink) = logger(LogLevel::Error);
        logger.warn("dropped", &[]);
        logger.log_info("dropped", &[]);
        logger.error("kept", &[]);
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn concurrent_callers_each_get_one_line() {
        let (logger, sink) = logger(LogLevel::Info);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        logger.info("tick", &[Field::new("thread", t), Field::new("i", i)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|l| columns(l).len() == 5));
    }

    #[test]
    fn plain_tracing_events_use_their_own_location() {
        let (logger, sink) = logger(LogLevel::Info);
        dispatcher::with_default(&logger.dispatch, || {
            tracing::info!(port = 8080, "listening");
        });
        let cols = columns(&sink.lines()[0]).iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(cols[2].starts_with("observability/logging.rs:"));
        assert_eq!(cols[3], "listening");
        assert_eq!(cols[4], "port=8080");
    }

    #[test]
    fn short_caller_keeps_two_components() {
        assert_eq!(short_caller("src/config/watcher.rs", 9), "config/watcher.rs:9");
        assert_eq!(short_caller("main.rs", 1), "main.rs:1");
    }

    #[test]
    fn init_only_once() {
        let config = LogConfig::default();
        assert!(Logger::init(&config).is_ok());
        assert!(Logger::global().is_some());
        assert!(matches!(
            Logger::init(&config),
            Err(LoggingError::AlreadyInitialized)
        ));
    }
}
