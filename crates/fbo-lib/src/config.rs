//! Environment configuration loader.
//!
//! [`Config::from_map`] validates a flat environment map into an immutable,
//! nested configuration. Every missing or invalid variable is collected and
//! reported in a single [`AppError`] of kind configuration:
//!
//! ```text
//! Environment validation failed:
//! FINANCE_API_KEY: is required
//! PG_MAX_CONNECTIONS: must be an integer >= 1
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::error::{AppError, Result};

pub const DEFAULT_DISPERSION_ENDPOINT: &str = "/api/v1/dispersion/receive";

/// Deployment environment selected by `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Development,
    Production,
    Local,
    Dev,
    Prod,
    Test,
}

impl AppEnv {
    const ALLOWED: &'static [&'static str] =
        &["development", "production", "local", "dev", "prod", "test"];

    fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(AppEnv::Development),
            "production" => Some(AppEnv::Production),
            "local" => Some(AppEnv::Local),
            "dev" => Some(AppEnv::Dev),
            "prod" => Some(AppEnv::Prod),
            "test" => Some(AppEnv::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
            AppEnv::Local => "local",
            AppEnv::Dev => "dev",
            AppEnv::Prod => "prod",
            AppEnv::Test => "test",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AppEnv::Local)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development | AppEnv::Dev)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, AppEnv::Production | AppEnv::Prod)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub env: AppEnv,
    /// Function/application name (`AWS_APP_NAME`).
    pub name: String,
    pub expiration_hours: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct FinanceConfig {
    pub base_url: String,
    pub api_key: String,
    pub dispersion_endpoint: String,
}

impl fmt::Debug for FinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinanceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("dispersion_endpoint", &self.dispersion_endpoint)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub s3_bucket_name: String,
    /// Buckets whose notifications the gateway processes.
    pub allowed_s3_buckets: Vec<String>,
}

impl AwsConfig {
    pub fn is_bucket_allowed(&self, bucket: &str) -> bool {
        self.allowed_s3_buckets.iter().any(|b| b == bucket)
    }
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("s3_bucket_name", &self.s3_bucket_name)
            .field("allowed_s3_buckets", &self.allowed_s3_buckets)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub uri: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub max_idle_time: Duration,
    pub server_selection_timeout: Duration,
}

/// Inline service-account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BigQueryCredentials {
    pub client_email: String,
    pub private_key: String,
}

impl fmt::Debug for BigQueryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryCredentials")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub location: String,
    pub key_filename: Option<String>,
    pub credentials: Option<BigQueryCredentials>,
    pub max_retries: u32,
    pub auto_retry: bool,
}

/// Validated process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app: AppSettings,
    pub finance: FinanceConfig,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub mongo: MongoConfig,
    pub bigquery: BigQueryConfig,
}

impl Config {
    /// Validate the process environment, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(AppError::configuration(format!("failed to read .env file: {e}"))
                    .with_source(e))
            }
        }
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Validate a raw environment map.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut env = EnvReader::new(vars);

        let app = AppSettings {
            env: env.app_env("APP_ENV"),
            name: env.required("AWS_APP_NAME"),
            expiration_hours: env.int_at_least("EXPIRATION_HOURS", 12, 1) as u32,
        };

        let finance = FinanceConfig {
            base_url: env.url("FINANCE_BASE_URL", &["http", "https"]),
            api_key: env.required("FINANCE_API_KEY"),
            dispersion_endpoint: env
                .optional("FINANCE_DISPERSION_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_DISPERSION_ENDPOINT.to_string()),
        };

        let s3_bucket_name = env.required("S3_BUCKET_NAME");
        let allowed_s3_buckets = env
            .list("ALLOWED_S3_BUCKETS")
            .unwrap_or_else(|| vec![s3_bucket_name.clone()]);
        let aws = AwsConfig {
            region: env.required("AWS_REGION"),
            access_key_id: env.optional("AWS_ACCESS_KEY_ID"),
            secret_access_key: env.optional("AWS_SECRET_ACCESS_KEY"),
            s3_bucket_name,
            allowed_s3_buckets,
        };

        let postgres = PostgresConfig {
            uri: env.url("PG_URI", &["postgres", "postgresql"]),
            max_connections: env.int_at_least("PG_MAX_CONNECTIONS", 10, 1) as u32,
            connection_timeout: env.millis("PG_CONNECTION_TIMEOUT", 30_000),
            idle_timeout: env.millis("PG_IDLE_TIMEOUT", 30_000),
        };

        let mongo = MongoConfig {
            uri: env.prefixed("MONGO_URI", &["mongodb://", "mongodb+srv://"]),
            database: env.required("MONGO_DATABASE"),
            max_pool_size: env.int_at_least("MONGO_MAX_POOL_SIZE", 10, 1) as u32,
            min_pool_size: env.int_at_least("MONGO_MIN_POOL_SIZE", 1, 0) as u32,
            max_idle_time: env.millis("MONGO_MAX_IDLE_TIME", 30_000),
            server_selection_timeout: env.millis("MONGO_SERVER_SELECTION_TIMEOUT", 30_000),
        };

        let client_email = env.optional("BIGQUERY_CLIENT_EMAIL");
        let private_key = env
            .optional("BIGQUERY_PRIVATE_KEY")
            .map(|key| key.replace("\\n", "\n"));
        let bigquery = BigQueryConfig {
            project_id: env.required("BIGQUERY_PROJECT_ID"),
            dataset_id: env.required("BIGQUERY_DATASET_ID"),
            location: env
                .optional("BIGQUERY_LOCATION")
                .unwrap_or_else(|| "US".to_string()),
            key_filename: env.optional("BIGQUERY_KEY_FILENAME"),
            credentials: match (client_email, private_key) {
                (Some(client_email), Some(private_key)) => Some(BigQueryCredentials {
                    client_email,
                    private_key,
                }),
                _ => None,
            },
            max_retries: env.int_at_least("BIGQUERY_MAX_RETRIES", 3, 1) as u32,
            auto_retry: env
                .optional("BIGQUERY_AUTO_RETRY")
                .map(|v| v != "false")
                .unwrap_or(true),
        };

        env.finish()?;

        Ok(Config {
            app,
            finance,
            aws,
            postgres,
            mongo,
            bigquery,
        })
    }
}

/// Reads variables and accumulates `FIELD: reason` failures.
struct EnvReader<'a> {
    vars: &'a HashMap<String, String>,
    errors: Vec<String>,
}

impl<'a> EnvReader<'a> {
    fn new(vars: &'a HashMap<String, String>) -> Self {
        Self {
            vars,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, key: &str, reason: impl fmt::Display) {
        self.errors.push(format!("{key}: {reason}"));
    }

    fn raw(&self, key: &str) -> Option<&'a str> {
        self.vars.get(key).map(|v| v.trim())
    }

    fn required(&mut self, key: &str) -> String {
        match self.raw(key) {
            Some(v) if !v.is_empty() => v.to_string(),
            Some(_) => {
                self.fail(key, "must not be empty");
                String::new()
            }
            None => {
                self.fail(key, "is required");
                String::new()
            }
        }
    }

    fn optional(&mut self, key: &str) -> Option<String> {
        self.raw(key)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    }

    fn list(&mut self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .optional(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }

    fn url(&mut self, key: &str, schemes: &[&str]) -> String {
        let value = self.required(key);
        if value.is_empty() {
            return value;
        }
        match Url::parse(&value) {
            Ok(url) if schemes.contains(&url.scheme()) => value,
            Ok(url) => {
                self.fail(
                    key,
                    format!(
                        "unsupported scheme '{}', expected one of {}",
                        url.scheme(),
                        schemes.join(", ")
                    ),
                );
                value
            }
            Err(e) => {
                self.fail(key, format!("must be a valid URL ({e})"));
                value
            }
        }
    }

    /// Connection strings that `Url` cannot parse, such as replica-set host lists.
    fn prefixed(&mut self, key: &str, prefixes: &[&str]) -> String {
        let value = self.required(key);
        if !value.is_empty() && !prefixes.iter().any(|p| value.starts_with(p)) {
            self.fail(key, format!("must start with one of {}", prefixes.join(", ")));
        }
        value
    }

    fn int_at_least(&mut self, key: &str, default: u64, min: u64) -> u64 {
        let Some(raw) = self.optional(key) else {
            return default;
        };
        match raw.parse::<u64>() {
            Ok(n) if n >= min => n,
            _ => {
                self.fail(key, format!("must be an integer >= {min}"));
                default
            }
        }
    }

    fn millis(&mut self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.int_at_least(key, default_ms, 1000))
    }

    fn app_env(&mut self, key: &str) -> AppEnv {
        let Some(raw) = self.optional(key) else {
            return AppEnv::default();
        };
        AppEnv::parse(&raw).unwrap_or_else(|| {
            self.fail(
                key,
                format!("must be one of {}", AppEnv::ALLOWED.join(", ")),
            );
            AppEnv::default()
        })
    }

    fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(AppError::configuration(format!(
            "Environment validation failed:\n{}",
            self.errors.join("\n")
        ))
        .with_detail("errors", self.errors))
    }
}
