//! Buffered, leveled step logs.
//!
//! Steps do not print as they go. Each dispatched unit buffers its
//! [`LogLine`]s and the engine replays them when a run fails, so a failure
//! report carries the whole narrative up to the failing step.
//!
//! Code that cannot reach an [`Assertion`](crate::Assertion) (a subject's
//! own logger, say) can still land lines in the current step through a
//! [`StepLogger`], or, with the `tracing` feature, by installing
//! [`StepLogLayer`] on its subscriber.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::assertion::StepScope;

/// Structured log fields.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Something unexpected but survivable.
    Warn,
    /// A failure that did not stop the step.
    Error,
    /// A failure that stopped the step.
    Fatal,
}

impl LogLevel {
    /// Upper-case level name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`LogLevel`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            _ => Err(ParseLevelError(s.to_owned())),
        }
    }
}

/// One buffered log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Structured fields, rendered as JSON.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: Fields,
}

impl LogLine {
    /// Create a line without fields.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: Fields::new(),
        }
    }

    /// Replace the line's fields.
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Add one field, serialized to JSON.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.fields.insert(key.into(), field_value(value));
        self
    }

    /// Render as `LEVEL: message`, followed by one indented `key: json` line
    /// per field.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.level, self.message);
        for (key, value) in &self.fields {
            let json = serde_json::to_string_pretty(value)
                .unwrap_or_else(|err| format!("ERROR: {err}"));
            out.push_str(&format!("\n  {key}: {}", json.replace('\n', "\n  ")));
        }
        out
    }
}

/// Serialize a field value, recording the serialization error in its place
/// if there is one.
pub fn field_value(value: impl Serialize) -> serde_json::Value {
    serde_json::to_value(value)
        .unwrap_or_else(|err| serde_json::Value::String(format!("ERROR: {err}")))
}

// ============================================================================
// Current-step routing
// ============================================================================

/// Shared pointer to the unit currently executing in a run.
pub(crate) type CurrentStep = Arc<Mutex<Option<Arc<StepScope>>>>;

/// Routes log lines into whichever step is currently running.
///
/// Obtained from [`Stepper::logger`](crate::Stepper::logger). Lines logged
/// while no step is running are emitted as a standalone warning instead.
/// Lines logged from background work are attributed to whatever step is
/// current at that moment.
#[derive(Debug, Clone, Default)]
pub struct StepLogger {
    current: CurrentStep,
}

impl StepLogger {
    pub(crate) fn new(current: CurrentStep) -> Self {
        Self { current }
    }

    /// Log a leveled line with fields into the current step.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, fields: Fields) {
        let line = LogLine::new(level, message).with_fields(fields);
        if let Err(line) = self.try_log(line) {
            warn_outside_step(&line);
        }
    }

    /// Log into the current step, handing the line back if there is none.
    pub fn try_log(&self, line: LogLine) -> Result<(), LogLine> {
        let current = self.current.lock().clone();
        match current {
            Some(scope) => {
                scope.push(line);
                Ok(())
            }
            None => Err(line),
        }
    }

    /// Name of the unit currently running, if any.
    pub fn current_unit(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .map(|scope| scope.unit().to_owned())
    }
}

fn warn_outside_step(line: &LogLine) {
    #[cfg(feature = "tracing")]
    tracing::warn!(line = %line.render(), "log called outside of any step");

    #[cfg(not(feature = "tracing"))]
    eprintln!("WARN: log called outside of any step\n  {}", line.render());
}

// ============================================================================
// tracing integration
// ============================================================================

/// A `tracing_subscriber` layer that copies events into the current step.
///
/// Events from this crate's own targets are ignored, as are events emitted
/// while no step is running.
///
/// ```no_run
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let ss = stepwise::Stepper::new("with tracing");
/// let subscriber = tracing_subscriber::registry().with(stepwise::StepLogLayer::new(ss.logger()));
/// let _guard = tracing::subscriber::set_default(subscriber);
/// ```
#[cfg(feature = "tracing")]
#[derive(Debug, Clone)]
pub struct StepLogLayer {
    logger: StepLogger,
}

#[cfg(feature = "tracing")]
impl StepLogLayer {
    /// Route events through `logger`.
    pub fn new(logger: StepLogger) -> Self {
        Self { logger }
    }
}

#[cfg(feature = "tracing")]
impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for StepLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(env!("CARGO_CRATE_NAME")) {
            return;
        }

        let level = match *metadata.level() {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let line = LogLine::new(level, visitor.message).with_fields(visitor.fields);
        // No current step: drop it, the subscriber's other layers still see it.
        let _ = self.logger.try_log(line);
    }
}

#[cfg(feature = "tracing")]
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Fields,
}

#[cfg(feature = "tracing")]
impl FieldVisitor {
    fn insert(&mut self, field: &tracing::field::Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_owned(), value);
    }
}

#[cfg(feature = "tracing")]
impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.insert(field, serde_json::Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.insert(field, value.into());
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, value.into());
    }
}
