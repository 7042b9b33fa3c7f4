//! Generic JSON HTTP client with keep-alive pooling and retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::logger::Logger;
use crate::retry::RetryConfig;

const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie", "set-cookie"];
const REDACTED: &str = "[REDACTED]";

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Prefix for relative request paths.
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// `max_retries` of 0 disables retrying.
    pub retry: RetryConfig,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        let headers = HashMap::from([
            ("User-Agent".to_string(), "FBO-Lambda/1.0".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            headers,
        }
    }
}

impl HttpClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful (status < 400) response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed JSON, or a JSON string when the body is not JSON.
    pub body: Value,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            AppError::external_service(format!("unexpected response body: {e}")).with_source(e)
        })
    }
}

/// Pooled HTTP client. Every request runs under [`retry_with_backoff`].
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    logger: Logger,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig, logger: &Logger) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers(header_map(&config.headers)?)
            .build()
            .map_err(|e| {
                AppError::external_service(format!("failed to build HTTP client: {e}"))
                    .with_source(e)
            })?;

        Ok(Self {
            client,
            config,
            logger: logger.child("http"),
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(Method::POST, path, body, options).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.request(Method::PUT, path, body, options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::DELETE, path, None, options).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let url = self.resolve(path);
        let headers = header_map(&options.headers)?;

        self.logger.debug(
            "HTTP request",
            Some(json!({
                "method": method.as_str(),
                "url": url,
                "headers": sanitize_headers(&options.headers),
            })),
        )?;

        let result = self
            .config
            .retry
            .run(|| self.send_once(method.clone(), &url, body, &headers, &options))
            .await
            .map_err(AppError::from);

        match result {
            Ok(response) => {
                self.logger.debug(
                    "HTTP response",
                    Some(json!({
                        "method": method.as_str(),
                        "url": url,
                        "status": response.status,
                        "headers": sanitize_headers(&response.headers),
                    })),
                )?;
                Ok(response)
            }
            Err(err) => Err(self.logger.report(
                "HTTP request failed",
                err,
                Some(json!({ "method": method.as_str(), "url": url })),
            )),
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &HeaderMap,
        options: &RequestOptions,
    ) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone());
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            AppError::external_service(format!("HTTP request failed: {e}"))
                .with_detail("method", method.as_str())
                .with_detail("url", url)
                .with_source(e)
        })?;

        let status = response.status();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let text = response.text().await.map_err(|e| {
            AppError::external_service(format!("failed to read response body: {e}"))
                .with_source(e)
        })?;

        if status.as_u16() >= 400 {
            return Err(AppError::external_service(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            ))
            .with_detail("status", status.as_u16())
            .with_detail("method", method.as_str())
            .with_detail("url", url)
            .with_detail("body", text));
        }

        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            headers: response_headers,
            body,
        })
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        match &self.config.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }
}

/// One client per base URL, created on first use.
pub struct HttpClientRegistry {
    clients: Mutex<HashMap<String, Arc<HttpClient>>>,
    logger: Logger,
}

impl HttpClientRegistry {
    pub fn new(logger: &Logger) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            logger: logger.clone(),
        }
    }

    /// Return the cached client for `config.base_url`, creating it if absent.
    pub fn get_or_create(&self, config: HttpClientConfig) -> Result<Arc<HttpClient>> {
        let key = config
            .base_url
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| AppError::new("HTTP client registry lock poisoned"))?;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(HttpClient::new(config, &self.logger)?);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy of `headers` with credential-bearing values replaced.
pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            let value = if SENSITIVE_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                REDACTED.to_string()
            } else {
                v.clone()
            };
            (k.clone(), value)
        })
        .collect()
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            AppError::validation(format!("invalid header name '{name}'")).with_source(e)
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            AppError::validation(format!("invalid value for header '{name}'")).with_source(e)
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EXTERNAL_SERVICE_ERROR;
    use crate::logger::MemorySink;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer, retries: i32) -> (HttpClient, MemorySink) {
        let sink = MemorySink::new();
        let logger = Logger::with_sink("test", Arc::new(sink.clone()));
        let config = HttpClientConfig {
            retry: RetryConfig {
                max_retries: retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..HttpClientConfig::default()
        }
        .with_base_url(server.uri());
        (HttpClient::new(config, &logger).unwrap(), sink)
    }

    #[tokio::test]
    async fn test_get_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bills/42"))
            .and(query_param("expand", "lines"))
            .and(header("user-agent", "FBO-Lambda/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42 })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = test_client(&server, 0);
        let response = client
            .get("/bills/42", RequestOptions::default().query("expand", "lines"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body["id"], 42);
    }

    #[tokio::test]
    async fn test_post_sends_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bills"))
            .and(header("x-api-key", "k"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, sink) = test_client(&server, 0);
        let response = client
            .post(
                "bills",
                Some(&json!({ "amount": 10 })),
                RequestOptions::default().header("X-API-Key", "k"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        let request_log = &sink.records()[0];
        assert_eq!(request_log["headers"]["X-API-Key"], REDACTED);
    }

    #[tokio::test]
    async fn test_error_status_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let (client, sink) = test_client(&server, 2);
        let err = client
            .get("/flaky", RequestOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), EXTERNAL_SERVICE_ERROR);
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
        assert_eq!(err.details()["status"], 503);

        let errors: Vec<Value> = sink
            .records()
            .into_iter()
            .filter(|r| r["level"] == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["service"], "test:http");
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
            .mount(&server)
            .await;

        let (client, _) = test_client(&server, 3);
        let response = client
            .get("/eventually", RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.body, Value::String("plain".into()));
    }

    #[test]
    fn test_sanitize_headers() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("Cookie".to_string(), "session=1".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["Authorization"], REDACTED);
        assert_eq!(sanitized["Cookie"], REDACTED);
        assert_eq!(sanitized["Accept"], "application/json");
    }

    #[test]
    fn test_registry_caches_by_base_url() {
        let registry = HttpClientRegistry::new(&Logger::new("test"));
        let a = registry
            .get_or_create(HttpClientConfig::default().with_base_url("https://a.example"))
            .unwrap();
        let a_again = registry
            .get_or_create(HttpClientConfig::default().with_base_url("https://a.example"))
            .unwrap();
        let b = registry
            .get_or_create(HttpClientConfig::default().with_base_url("https://b.example"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }
}
