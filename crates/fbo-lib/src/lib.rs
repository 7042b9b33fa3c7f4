//! FBO gateway library entry points.
//!
//! This crate holds everything the Lambda functions share that is not tied to
//! the Lambda runtime: environment configuration, the structured logger, the
//! retry helper, the typed error hierarchy, and clients for S3, PostgreSQL,
//! MongoDB, BigQuery and HTTP APIs. Lambda crates should depend on the items
//! exported here rather than talking to vendor SDKs directly.

#![deny(warnings)]

pub mod clients;
pub mod config;
pub mod error;
pub mod finance;
pub mod logger;
pub mod retry;
pub mod util;

pub use config::{
    AppEnv, AppSettings, AwsConfig, BigQueryConfig, BigQueryCredentials, Config, FinanceConfig,
    MongoConfig, PostgresConfig,
};
pub use error::{AppError, DatabaseEngine, ErrorKind, Result};
pub use finance::{DispersionData, DispersionResponse, FinanceService, HealthStatus};
pub use logger::{describe_error, Level, LogSink, Logger, MemorySink, StderrSink};
pub use retry::{backoff_delay, retry_with_backoff, RetryConfig, RetryError};
