use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Convenient result alias for the gateway library.
pub type Result<T> = std::result::Result<T, AppError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error code carried by the generic application error.
pub const LAMBDA_ERROR: &str = "LAMBDA_ERROR";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
pub const EXTERNAL_SERVICE_ERROR: &str = "EXTERNAL_SERVICE_ERROR";
pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
pub const POSTGRES_ERROR: &str = "POSTGRES_ERROR";
pub const MONGO_ERROR: &str = "MONGO_ERROR";
pub const BIGQUERY_ERROR: &str = "BIGQUERY_ERROR";

/// Storage engine behind a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    /// Engine-agnostic database failure.
    Generic,
    Postgres,
    Mongo,
    BigQuery,
}

/// Classification of an [`AppError`].
///
/// The kind is chosen at construction and cannot be changed afterwards, so
/// the error code and status code observed on an error never vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic application error with a caller-chosen code and status.
    Lambda { code: String, status: u16 },
    /// Bad caller input.
    Validation,
    /// Missing or invalid startup configuration.
    Configuration,
    /// An upstream dependency (object storage, HTTP API) failed.
    ExternalService,
    /// A database engine failed.
    Database(DatabaseEngine),
}

impl ErrorKind {
    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            ErrorKind::Lambda { code, .. } => code,
            ErrorKind::Validation => VALIDATION_ERROR,
            ErrorKind::Configuration => CONFIGURATION_ERROR,
            ErrorKind::ExternalService => EXTERNAL_SERVICE_ERROR,
            ErrorKind::Database(DatabaseEngine::Generic) => DATABASE_ERROR,
            ErrorKind::Database(DatabaseEngine::Postgres) => POSTGRES_ERROR,
            ErrorKind::Database(DatabaseEngine::Mongo) => MONGO_ERROR,
            ErrorKind::Database(DatabaseEngine::BigQuery) => BIGQUERY_ERROR,
        }
    }

    /// HTTP status code associated with the kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Lambda { status, .. } => *status,
            ErrorKind::Validation => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::ExternalService => 502,
            ErrorKind::Database(_) => 500,
        }
    }

    /// Type name used in log records.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Lambda { .. } => "LambdaError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::ExternalService => "ExternalServiceError",
            ErrorKind::Database(DatabaseEngine::Generic) => "DatabaseError",
            ErrorKind::Database(DatabaseEngine::Postgres) => "PostgresError",
            ErrorKind::Database(DatabaseEngine::Mongo) => "MongoError",
            ErrorKind::Database(DatabaseEngine::BigQuery) => "BigQueryError",
        }
    }
}

/// Root application error.
///
/// Every failure surfaced by the library is an `AppError`. Vendor errors are
/// kept as the [`std::error::Error::source`] and described under
/// `details.error` so log records retain the original diagnostic.
#[derive(Error)]
#[error("{message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    details: Map<String, Value>,
    timestamp: DateTime<Utc>,
    #[source]
    source: Option<BoxError>,
}

impl AppError {
    fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Map::new(),
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Generic error (`LAMBDA_ERROR`, 500).
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(message, LAMBDA_ERROR, 500)
    }

    /// Generic error with a custom code and status.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>, status: u16) -> Self {
        Self::with_kind(
            ErrorKind::Lambda {
                code: code.into(),
                status,
            },
            message,
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Validation, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Configuration, message)
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::ExternalService, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Database(DatabaseEngine::Generic), message)
    }

    pub fn postgres(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Database(DatabaseEngine::Postgres), message)
    }

    pub fn mongo(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Database(DatabaseEngine::Mongo), message)
    }

    pub fn bigquery(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Database(DatabaseEngine::BigQuery), message)
    }

    /// Merge diagnostic fields into `details`.
    ///
    /// Non-object values are stored under `details.value`.
    pub fn with_details(mut self, details: Value) -> Self {
        match details {
            Value::Object(map) => self.details.extend(map),
            Value::Null => {}
            other => {
                self.details.insert("value".to_string(), other);
            }
        }
        self
    }

    /// Set a single diagnostic field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying error, recording it under `details.error`.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.details.insert(
            "error".to_string(),
            json!({
                "name": short_type_name::<E>(),
                "message": source.to_string(),
            }),
        );
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_code(&self) -> &str {
        self.kind.code()
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True for the database error and every engine-specific variant.
    pub fn is_database(&self) -> bool {
        matches!(self.kind, ErrorKind::Database(_))
    }

    /// Engine behind a database error.
    pub fn database_engine(&self) -> Option<DatabaseEngine> {
        match self.kind {
            ErrorKind::Database(engine) => Some(engine),
            _ => None,
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.name())
            .field("code", &self.error_code())
            .field("status", &self.status_code())
            .field("message", &self.message)
            .field("details", &self.details)
            .field("source", &self.source)
            .finish()
    }
}

impl Serialize for AppError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AppError", 6)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("errorCode", self.error_code())?;
        state.serialize_field("statusCode", &self.status_code())?;
        state.serialize_field("details", &self.details)?;
        state.serialize_field("timestamp", &self.timestamp.to_rfc3339())?;
        state.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::new(format!("I/O error: {err}")).with_source(err)
    }
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
