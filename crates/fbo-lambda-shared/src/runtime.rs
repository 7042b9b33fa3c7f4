//! Per-process service container.
//!
//! The container is built once at cold start and handed to every invocation.
//! Backend clients are created on first use and then reused for as long as
//! the execution environment stays warm; nothing connects eagerly.

use std::sync::OnceLock;
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::info;

use fbo_lib::clients::{BigQueryClient, HttpClientRegistry, MongoClient, PostgresClient, S3Client};
use fbo_lib::{Config, FinanceService, Logger, Result};

/// Service name of the root application logger.
pub const ROOT_SERVICE: &str = "LambdaHandler";

pub struct ServiceContainer {
    config: Config,
    logger: Logger,
    http: HttpClientRegistry,
    s3: OnceCell<S3Client>,
    postgres: OnceLock<PostgresClient>,
    mongo: OnceLock<MongoClient>,
    bigquery: OnceLock<BigQueryClient>,
    finance: OnceCell<FinanceService>,
}

impl ServiceContainer {
    pub fn new(config: Config) -> Self {
        Self::with_logger(config, Logger::new(ROOT_SERVICE))
    }

    /// Build a container that writes application records through `logger`.
    pub fn with_logger(config: Config, logger: Logger) -> Self {
        let started = Instant::now();
        let container = Self {
            http: HttpClientRegistry::new(&logger),
            config,
            logger,
            s3: OnceCell::new(),
            postgres: OnceLock::new(),
            mongo: OnceLock::new(),
            bigquery: OnceLock::new(),
            finance: OnceCell::new(),
        };
        info!(
            app = %container.config.app.name,
            env = container.config.app.env.as_str(),
            init_ms = started.elapsed().as_millis() as u64,
            "service container initialized"
        );
        container
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn http(&self) -> &HttpClientRegistry {
        &self.http
    }

    pub async fn s3(&self) -> &S3Client {
        self.s3
            .get_or_init(|| S3Client::new(&self.config.aws, &self.logger))
            .await
    }

    /// Not connected; callers run `connect()` themselves.
    pub fn postgres(&self) -> &PostgresClient {
        self.postgres
            .get_or_init(|| PostgresClient::new(self.config.postgres.clone(), &self.logger))
    }

    pub fn mongo(&self) -> &MongoClient {
        self.mongo
            .get_or_init(|| MongoClient::new(self.config.mongo.clone(), &self.logger))
    }

    pub fn bigquery(&self) -> &BigQueryClient {
        self.bigquery
            .get_or_init(|| BigQueryClient::new(self.config.bigquery.clone(), &self.logger))
    }

    pub async fn finance(&self) -> Result<&FinanceService> {
        self.finance
            .get_or_try_init(|| async {
                FinanceService::new(self.config.finance.clone(), &self.http, &self.logger)
            })
            .await
    }

    /// Release every backend that was connected during this process.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(postgres) = self.postgres.get() {
            postgres.disconnect().await?;
        }
        if let Some(mongo) = self.mongo.get() {
            mongo.disconnect().await?;
        }
        if let Some(bigquery) = self.bigquery.get() {
            bigquery.disconnect().await?;
        }
        Ok(())
    }
}
