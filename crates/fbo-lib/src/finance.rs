//! Finance API integration.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::clients::http::{HttpClient, HttpClientConfig, HttpClientRegistry, RequestOptions};
use crate::config::FinanceConfig;
use crate::error::{AppError, Result};
use crate::logger::Logger;

pub const ALLOWED_EXTENSIONS: &[&str] = &[".csv", ".xlsx", ".txt"];
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MIN_FILE_SIZE: u64 = 1024;

const DISPERSION_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Uploaded dispersion file, as posted to the dispersion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispersionData {
    pub file_name: String,
    pub file_size: u64,
    /// RFC 3339 upload time.
    pub upload_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Outcome of a dispersion submission. Failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispersionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub response_time_ms: u64,
}

pub struct FinanceService {
    config: FinanceConfig,
    http: Arc<HttpClient>,
    logger: Logger,
}

impl FinanceService {
    pub fn new(config: FinanceConfig, registry: &HttpClientRegistry, logger: &Logger) -> Result<Self> {
        let http = registry.get_or_create(
            HttpClientConfig {
                timeout: DISPERSION_TIMEOUT,
                ..HttpClientConfig::default()
            }
            .with_base_url(config.base_url.clone()),
        )?;
        Ok(Self::with_client(config, http, logger))
    }

    /// Use an existing HTTP client, e.g. one with a custom retry policy.
    pub fn with_client(config: FinanceConfig, http: Arc<HttpClient>, logger: &Logger) -> Self {
        Self {
            config,
            http,
            logger: logger.child("finance"),
        }
    }

    /// Post a dispersion file's details to the finance API.
    pub async fn send_dispersion_data(&self, data: &DispersionData) -> Result<DispersionResponse> {
        self.logger.info(
            "Sending dispersion data to finance API",
            Some(json!({
                "fileName": data.file_name,
                "fileSize": data.file_size,
                "endpoint": self.config.dispersion_endpoint,
            })),
        )?;

        let body = serde_json::to_value(data).map_err(|e| {
            AppError::validation("dispersion data is not serializable").with_source(e)
        })?;
        let options = RequestOptions::default()
            .header("X-API-Key", self.config.api_key.clone())
            .timeout(DISPERSION_TIMEOUT);

        match self
            .http
            .post(&self.config.dispersion_endpoint, Some(&body), options)
            .await
        {
            Ok(response) => {
                let message = response.body["message"].as_str().map(ToString::to_string);
                self.logger.info(
                    "Dispersion data sent successfully",
                    Some(json!({
                        "fileName": data.file_name,
                        "status": response.status,
                        "message": message,
                    })),
                )?;
                Ok(DispersionResponse {
                    success: true,
                    message,
                    data: response.body.get("data").cloned(),
                    error: None,
                })
            }
            Err(err) => {
                let err = self.logger.report(
                    "Failed to send dispersion data",
                    err,
                    Some(json!({
                        "fileName": data.file_name,
                        "endpoint": self.config.dispersion_endpoint,
                    })),
                );
                Ok(DispersionResponse {
                    success: false,
                    message: None,
                    data: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Check a bank file's extension and size before processing.
    pub fn validate_finance_file(&self, file_name: &str, file_size: u64) -> FileValidation {
        validate_finance_file(file_name, file_size)
    }

    /// Probe `GET /health` with the API key.
    pub async fn get_health_status(&self) -> Result<HealthStatus> {
        let options = RequestOptions::default()
            .header("X-API-Key", self.config.api_key.clone())
            .timeout(HEALTH_TIMEOUT);
        let started = Instant::now();
        let result = self.http.get("/health", options).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                self.logger.info(
                    "Finance API health check successful",
                    Some(json!({ "responseTimeMs": response_time_ms })),
                )?;
                Ok(HealthStatus {
                    healthy: true,
                    response_time_ms,
                })
            }
            Err(err) => {
                self.logger.report(
                    "Finance API health check failed",
                    err,
                    Some(json!({ "responseTimeMs": response_time_ms })),
                );
                Ok(HealthStatus {
                    healthy: false,
                    response_time_ms,
                })
            }
        }
    }
}

pub fn validate_finance_file(file_name: &str, file_size: u64) -> FileValidation {
    let mut errors = Vec::new();

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()));
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => errors.push(format!(
            "Invalid file extension. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )),
    }

    if file_size > MAX_FILE_SIZE {
        errors.push(format!(
            "File size exceeds maximum allowed size of {}",
            crate::util::format_bytes(MAX_FILE_SIZE)
        ));
    }
    if file_size < MIN_FILE_SIZE {
        errors.push(format!(
            "File size is below minimum required size of {}",
            crate::util::format_bytes(MIN_FILE_SIZE)
        ));
    }

    FileValidation {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowed_file() {
        let result = validate_finance_file("dispersion_2025.CSV", 10 * 1024);
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_collects_every_violation() {
        let result = validate_finance_file("statement.pdf", 10);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains(".csv, .xlsx, .txt"));
        assert!(result.errors[1].contains("1 KB"));
    }

    #[test]
    fn test_rejects_oversized_file() {
        let result = validate_finance_file("big.xlsx", MAX_FILE_SIZE + 1);
        assert_eq!(result.errors, vec!["File size exceeds maximum allowed size of 50 MB"]);
    }

    #[test]
    fn test_rejects_missing_extension() {
        assert!(!validate_finance_file("README", 2048).valid);
    }
}
