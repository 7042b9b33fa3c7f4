//! Structured JSON logger.
//!
//! Each call writes exactly one JSON object on a single line:
//!
//! ```text
//! {"timestamp":"2025-01-01T00:00:00.000Z","level":"info","service":"gateway","message":"...","requestId":"r1", ...meta}
//! ```
//!
//! Records are written synchronously through a [`LogSink`]; a failed write is
//! returned to the caller rather than dropped.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::AppError;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for serialized log lines.
pub trait LogSink: Send + Sync {
    /// Write one complete line. Implementations must issue a single write.
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Writes records to the process's standard error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        io::stderr().lock().write_all(buf.as_bytes())
    }
}

/// Collects records in memory. Used by tests to inspect output.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Lines parsed back into JSON. Unparseable lines are skipped.
    pub fn records(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::other("log sink poisoned"))?;
        lines.push(line.to_string());
        Ok(())
    }
}

/// Structured logger bound to a service name and optional request id.
#[derive(Clone)]
pub struct Logger {
    service: String,
    request_id: Option<String>,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("service", &self.service)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Logger writing to stderr.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_sink(service, Arc::new(StderrSink))
    }

    pub fn with_sink(service: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            service: service.into(),
            request_id: None,
            sink,
        }
    }

    /// Bind a request correlation id to every record.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Derive a logger named `<service>:<suffix>` sharing the request id and sink.
    pub fn child(&self, suffix: &str) -> Logger {
        Logger {
            service: format!("{}:{}", self.service, suffix),
            request_id: self.request_id.clone(),
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn debug(&self, message: &str, meta: Option<Value>) -> io::Result<()> {
        self.log(Level::Debug, message, None, meta)
    }

    pub fn info(&self, message: &str, meta: Option<Value>) -> io::Result<()> {
        self.log(Level::Info, message, None, meta)
    }

    pub fn warn(&self, message: &str, meta: Option<Value>) -> io::Result<()> {
        self.log(Level::Warn, message, None, meta)
    }

    pub fn error(
        &self,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        meta: Option<Value>,
    ) -> io::Result<()> {
        self.log(Level::Error, message, error, meta)
    }

    /// Log `err` at error level and hand it back unchanged. A record that
    /// cannot be written is reported through `tracing` instead.
    pub fn report(&self, message: &str, err: AppError, meta: Option<Value>) -> AppError {
        if let Err(write_err) = self.error(message, Some(&err), meta) {
            warn!(
                error = %write_err,
                service = %self.service,
                "failed to write application log record"
            );
        }
        err
    }

    fn log(
        &self,
        level: Level,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        meta: Option<Value>,
    ) -> io::Result<()> {
        let record = self.record(level, message, error, meta);
        let line = serde_json::to_string(&record).map_err(io::Error::other)?;
        self.sink.write_line(&line)
    }

    fn record(
        &self,
        level: Level,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        meta: Option<Value>,
    ) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert(
            "timestamp".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        record.insert("level".into(), level.as_str().into());
        record.insert("service".into(), self.service.clone().into());
        record.insert("message".into(), message.into());
        if let Some(id) = &self.request_id {
            record.insert("requestId".into(), id.clone().into());
        }

        match meta {
            Some(Value::Object(fields)) => record.extend(fields),
            Some(Value::Null) | None => {}
            Some(other) => {
                record.insert("meta".into(), other);
            }
        }

        if let Some(err) = error {
            record.insert("error".into(), describe_error(err));
        }

        record
    }
}

/// `{name, message, stack}` description of an error and its source chain.
pub fn describe_error(err: &(dyn StdError + 'static)) -> Value {
    let name = err
        .downcast_ref::<AppError>()
        .map(AppError::name)
        .unwrap_or("Error");

    let mut stack = format!("{name}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        stack.push_str("\n    caused by: ");
        stack.push_str(&cause.to_string());
        source = cause.source();
    }

    json!({
        "name": name,
        "message": err.to_string(),
        "stack": stack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl LogSink for FailingSink {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"))
        }
    }

    fn memory_logger(service: &str) -> (Logger, MemorySink) {
        let sink = MemorySink::new();
        (Logger::with_sink(service, Arc::new(sink.clone())), sink)
    }

    #[test]
    fn test_record_field_order() {
        let (logger, sink) = memory_logger("Service");
        let logger = logger.with_request_id("r1");

        logger.info("hello", Some(json!({ "a": 1 }))).unwrap();

        let line = &sink.lines()[0];
        assert!(!line.contains('\n'));
        let keys: Vec<String> = serde_json::from_str::<Map<String, Value>>(line)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(
            keys,
            vec!["timestamp", "level", "service", "message", "requestId", "a"]
        );
    }

    #[test]
    fn test_levels_are_lowercase() {
        let (logger, sink) = memory_logger("svc");
        logger.debug("d", None).unwrap();
        logger.info("i", None).unwrap();
        logger.warn("w", None).unwrap();
        logger.error("e", None, None).unwrap();

        let levels: Vec<Value> = sink.records().iter().map(|r| r["level"].clone()).collect();
        assert_eq!(levels, vec!["debug", "info", "warn", "error"]);
    }

    #[test]
    fn test_meta_is_shallow_merged_and_error_wins() {
        let (logger, sink) = memory_logger("svc");
        let err = AppError::postgres("query failed");

        logger
            .error(
                "operation failed",
                Some(&err),
                Some(json!({ "table": "bills", "error": "shadowed", "message": "meta" })),
            )
            .unwrap();

        let record = &sink.records()[0];
        assert_eq!(record["table"], "bills");
        assert_eq!(record["message"], "meta");
        assert_eq!(record["error"]["name"], "PostgresError");
        assert_eq!(record["error"]["message"], "query failed");
        assert!(record["error"]["stack"]
            .as_str()
            .unwrap()
            .starts_with("PostgresError: query failed"));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let (logger, sink) = memory_logger("svc");
        logger.info("t", None).unwrap();

        let ts = sink.records()[0]["timestamp"].as_str().unwrap().to_string();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_child_prefixes_service_and_keeps_request_id() {
        let (logger, sink) = memory_logger("Service");
        let parent = logger.with_request_id("r1");
        let child = parent.child("X");

        child.info("from child", None).unwrap();
        parent.info("from parent", None).unwrap();

        let records = sink.records();
        assert_eq!(records[0]["service"], "Service:X");
        assert_eq!(records[0]["requestId"], "r1");
        assert_eq!(records[1]["service"], "Service");
        assert_eq!(parent.service(), "Service");
    }

    #[test]
    fn test_no_request_id_field_when_unbound() {
        let (logger, sink) = memory_logger("svc");
        logger.info("x", None).unwrap();
        assert!(sink.records()[0].get("requestId").is_none());
    }

    #[test]
    fn test_write_failure_propagates() {
        let logger = Logger::with_sink("svc", Arc::new(FailingSink));
        let err = logger.info("lost", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_report_logs_and_returns_error() {
        let (logger, sink) = memory_logger("svc");
        let err = logger.report(
            "upload failed",
            AppError::external_service("S3 upload failed").with_detail("bucket", "fbo"),
            Some(json!({ "key": "a.csv" })),
        );

        assert_eq!(err.message(), "S3 upload failed");
        let record = &sink.records()[0];
        assert_eq!(record["level"], "error");
        assert_eq!(record["key"], "a.csv");
        assert_eq!(record["error"]["message"], "S3 upload failed");
    }

    #[test]
    fn test_report_keeps_error_when_write_fails() {
        let logger = Logger::with_sink("svc", Arc::new(FailingSink));
        let err = logger.report(
            "query failed",
            AppError::external_service("query failed").with_detail("error", "timeout"),
            None,
        );

        assert_eq!(err.message(), "query failed");
        assert_eq!(err.details()["error"], "timeout");
    }

    #[test]
    fn test_describe_error_includes_source_chain() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "socket timeout");
        let err = AppError::external_service("S3 download failed").with_source(io_err);

        let described = describe_error(&err);
        assert_eq!(described["name"], "ExternalServiceError");
        assert!(described["stack"]
            .as_str()
            .unwrap()
            .contains("caused by: socket timeout"));
    }
}
