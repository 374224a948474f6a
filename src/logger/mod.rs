//! Named, leveled loggers shared by every component of the state layer.
//!
//! Each component owns a lazily created [`Logger`] (for example
//! `@chat-state/store`). Loggers start at the global level, which can be
//! changed at runtime with [`set_log_level`]; a user handler installed with
//! [`set_user_log_handler`] receives every record that passes its threshold.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock, Weak};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static LIVE_LOGGERS: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

type SharedLogHandler = Arc<dyn Fn(&LogRecord<'_>) + Send + Sync + 'static>;

/// A single log call as seen by handlers.
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub logger: &'a str,
    pub level: LogLevel,
    pub threshold: LogLevel,
    pub arguments: &'a [LogArgument],
}

impl LogRecord<'_> {
    /// Joins the textual fragments of every argument with a single space.
    pub fn message(&self) -> String {
        build_message(self.arguments)
    }

    pub fn is_enabled(&self) -> bool {
        self.level != LogLevel::Silent && self.level >= self.threshold
    }
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.log_level())
            .finish()
    }
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner::new(name.into()));
        LIVE_LOGGERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.level.load(Ordering::SeqCst))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.level.store(level as u8, Ordering::SeqCst);
    }

    /// Replaces the sink used for this logger. The default sink prints to stdout/stderr.
    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
    {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(default_log_handler);
    }

    pub fn has_user_log_handler(&self) -> bool {
        self.inner
            .user_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn debug(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Debug, vec![arg.into_log_argument()]);
    }

    pub fn verbose(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Verbose, vec![arg.into_log_argument()]);
    }

    pub fn info(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Info, vec![arg.into_log_argument()]);
    }

    pub fn warn(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Warn, vec![arg.into_log_argument()]);
    }

    pub fn error(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Error, vec![arg.into_log_argument()]);
    }

    /// Logs several arguments as one record, e.g. a message followed by a JSON payload.
    pub fn log_with<I, T>(&self, level: LogLevel, args: I)
    where
        I: IntoIterator<Item = T>,
        T: IntoLogArgument,
    {
        let arguments = args.into_iter().map(IntoLogArgument::into_log_argument).collect();
        self.dispatch(level, arguments);
    }

    fn dispatch(&self, level: LogLevel, arguments: Vec<LogArgument>) {
        let record = LogRecord {
            logger: &self.inner.name,
            level,
            threshold: self.log_level(),
            arguments: &arguments,
        };
        let user_handler = self
            .inner
            .user_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = user_handler {
            handler(&record);
        }
        let handler = self
            .inner
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        handler(&record);
    }
}

struct LoggerInner {
    name: String,
    level: AtomicU8,
    handler: RwLock<SharedLogHandler>,
    user_handler: RwLock<Option<SharedLogHandler>>,
}

impl LoggerInner {
    fn new(name: String) -> Self {
        Self {
            name,
            level: AtomicU8::new(GLOBAL_LOG_LEVEL.load(Ordering::SeqCst)),
            handler: RwLock::new(Arc::new(default_log_handler)),
            user_handler: RwLock::new(None),
        }
    }
}

fn default_log_handler(record: &LogRecord<'_>) {
    if !record.is_enabled() {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let message = record.message();
    let line = if message.is_empty() {
        format!("[{now}]  {}:", record.logger)
    } else {
        format!("[{now}]  {}: {message}", record.logger)
    };

    match record.level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{line}"),
        _ => println!("{line}"),
    }
}

/// Handler forwarding enabled records to the `log` facade, targeted by logger name.
///
/// Install it with [`Logger::set_log_handler`] when the host already configures a
/// `log` backend.
pub fn log_facade_handler(record: &LogRecord<'_>) {
    if !record.is_enabled() {
        return;
    }
    let level = match record.level {
        LogLevel::Debug => log::Level::Trace,
        LogLevel::Verbose => log::Level::Debug,
        LogLevel::Info => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error | LogLevel::Silent => log::Level::Error,
    };
    log::log!(target: record.logger, level, "{}", record.message());
}

fn build_message(args: &[LogArgument]) -> String {
    args.iter()
        .filter_map(LogArgument::to_message_fragment)
        .collect::<Vec<_>>()
        .join(" ")
}

fn for_each_live_logger<F>(mut f: F)
where
    F: FnMut(&Arc<LoggerInner>),
{
    let mut loggers = LIVE_LOGGERS.lock().unwrap_or_else(PoisonError::into_inner);
    loggers.retain(|weak| match weak.upgrade() {
        Some(inner) => {
            f(&inner);
            true
        }
        None => false,
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" | "off" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

/// Payload handed to a user log handler.
#[derive(Debug, Clone)]
pub struct LogCallbackParams {
    pub level: LogLevel,
    pub message: String,
    pub args: Vec<Value>,
    pub logger_name: String,
}

pub type LogCallback = Arc<dyn Fn(LogCallbackParams) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub enum LogArgument {
    Text(String),
    Value(Value),
    Null,
}

impl LogArgument {
    pub fn to_message_fragment(&self) -> Option<String> {
        match self {
            LogArgument::Text(text) => Some(text.clone()),
            LogArgument::Value(Value::Null) | LogArgument::Null => None,
            LogArgument::Value(Value::String(text)) => Some(text.clone()),
            LogArgument::Value(other) => Some(other.to_string()),
        }
    }

    pub fn to_callback_value(&self) -> Value {
        match self {
            LogArgument::Text(text) => Value::String(text.clone()),
            LogArgument::Value(value) => value.clone(),
            LogArgument::Null => Value::Null,
        }
    }
}

pub trait IntoLogArgument {
    fn into_log_argument(self) -> LogArgument;
}

impl IntoLogArgument for LogArgument {
    fn into_log_argument(self) -> LogArgument {
        self
    }
}

impl IntoLogArgument for String {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self)
    }
}

impl IntoLogArgument for &str {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self.to_owned())
    }
}

impl IntoLogArgument for Value {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(self)
    }
}

impl IntoLogArgument for bool {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(Value::Bool(self))
    }
}

macro_rules! impl_integer_argument {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoLogArgument for $ty {
                fn into_log_argument(self) -> LogArgument {
                    LogArgument::Value(Value::from(self))
                }
            }
        )*
    };
}

impl_integer_argument!(i32, i64, u32, u64, usize);

impl<T> IntoLogArgument for Option<T>
where
    T: IntoLogArgument,
{
    fn into_log_argument(self) -> LogArgument {
        self.map_or(LogArgument::Null, IntoLogArgument::into_log_argument)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => write!(f, "invalid log level \"{level}\""),
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every live logger and of loggers created afterwards.
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    for_each_live_logger(|inner| inner.level.store(level as u8, Ordering::SeqCst));
}

/// Installs (or clears, with `None`) a callback receiving every enabled record.
///
/// `min_level` overrides each logger's own threshold for the callback.
pub fn set_user_log_handler(callback: Option<LogCallback>, min_level: Option<LogLevel>) {
    for_each_live_logger(|inner| {
        let handler = callback.as_ref().map(|callback| {
            let callback = Arc::clone(callback);
            Arc::new(move |record: &LogRecord<'_>| {
                let threshold = min_level.unwrap_or(record.threshold);
                if record.level == LogLevel::Silent || record.level < threshold {
                    return;
                }
                callback(LogCallbackParams {
                    level: record.level,
                    message: record.message(),
                    args: record
                        .arguments
                        .iter()
                        .map(LogArgument::to_callback_value)
                        .collect(),
                    logger_name: record.logger.to_owned(),
                });
            }) as SharedLogHandler
        });
        *inner
            .user_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    });
}
