//! Inbound event decoding.
//!
//! A raw Lambda payload is classified by an ordered list of shape predicates
//! and then decoded into one [`GatewayEvent`] variant. The first predicate
//! that matches wins; a payload matching none is [`EventKind::Unknown`].

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use fbo_lib::AppError;

/// Validation trait for decoded events.
pub trait Validate {
    /// Check invariants serde cannot express.
    fn validate(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    S3,
    Http,
    Custom,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::S3 => "s3",
            EventKind::Http => "http",
            EventKind::Custom => "custom",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type ShapePredicate = fn(&Value) -> bool;

/// Evaluated in order.
const CLASSIFIERS: &[(EventKind, ShapePredicate)] = &[
    (EventKind::S3, is_s3_event),
    (EventKind::Http, is_http_event),
    (EventKind::Custom, is_custom_event),
];

/// `Records` is an array whose first element has an `s3` field.
fn is_s3_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .is_some_and(|first| first.get("s3").is_some())
}

/// HTTP API v2 `requestContext.http.method` or REST v1 `httpMethod`.
fn is_http_event(event: &Value) -> bool {
    http_method(event).is_some()
}

fn is_custom_event(event: &Value) -> bool {
    event.get("action").is_some_and(Value::is_string)
}

fn http_method(event: &Value) -> Option<&str> {
    event
        .pointer("/requestContext/http/method")
        .and_then(Value::as_str)
        .or_else(|| event.get("httpMethod").and_then(Value::as_str))
}

/// Classify a raw payload without decoding it.
pub fn classify(event: &Value) -> EventKind {
    CLASSIFIERS
        .iter()
        .find(|(_, matches)| matches(event))
        .map(|(kind, _)| *kind)
        .unwrap_or(EventKind::Unknown)
}

/// Object-storage change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl Validate for S3Event {
    fn validate(&self) -> Result<(), AppError> {
        if let Some(idx) = self
            .records
            .iter()
            .position(|r| r.s3.bucket.name.is_empty() || r.s3.object.key.is_empty())
        {
            return Err(AppError::validation(format!(
                "S3 record {idx} is missing a bucket name or object key"
            )));
        }
        Ok(())
    }
}

/// API Gateway request, normalized across payload versions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRequest {
    /// Upper-cased.
    pub method: String,
    pub path: String,
    /// Keys are lower-cased.
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl HttpRequest {
    fn from_value(event: &Value) -> Result<Self, AppError> {
        let method = http_method(event)
            .ok_or_else(|| AppError::validation("HTTP event has no method"))?
            .to_ascii_uppercase();
        let path = event
            .get("rawPath")
            .or_else(|| event.get("path"))
            .or_else(|| event.pointer("/requestContext/http/path"))
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();

        let headers = string_map(event.get("headers"))
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(Self {
            method,
            path,
            headers,
            query: string_map(event.get("queryStringParameters")),
            body: event.get("body").and_then(Value::as_str).map(String::from),
            is_base64_encoded: event
                .get("isBase64Encoded")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as text, base64-decoded when flagged. Empty bodies are `None`.
    pub fn body_text(&self) -> Result<Option<String>, AppError> {
        let Some(body) = self.body.as_deref().filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        if !self.is_base64_encoded {
            return Ok(Some(body.to_string()));
        }

        let bytes = STANDARD
            .decode(body)
            .map_err(|e| AppError::validation("Request body is not valid base64").with_source(e))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| AppError::validation("Request body is not valid UTF-8").with_source(e))
    }
}

/// `null` and non-string values are dropped.
fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Direct invocation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub action: String,
    #[serde(default, alias = "payload", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Validate for CustomEvent {
    fn validate(&self) -> Result<(), AppError> {
        if self.action.trim().is_empty() {
            return Err(AppError::validation("Custom event action must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    S3(S3Event),
    Http(HttpRequest),
    Custom(CustomEvent),
    /// Kept as-is for logging.
    Unknown(Value),
}

impl GatewayEvent {
    /// Classify and decode `event`.
    ///
    /// A payload that matches a shape but fails to decode into it is a
    /// validation error; it never falls through to the next shape.
    pub fn decode(event: Value) -> Result<Self, AppError> {
        let decoded = match classify(&event) {
            EventKind::S3 => {
                let s3: S3Event = serde_json::from_value(event).map_err(|e| {
                    AppError::validation(format!("Malformed S3 event: {e}")).with_source(e)
                })?;
                s3.validate()?;
                GatewayEvent::S3(s3)
            }
            EventKind::Http => GatewayEvent::Http(HttpRequest::from_value(&event)?),
            EventKind::Custom => {
                let custom: CustomEvent = serde_json::from_value(event).map_err(|e| {
                    AppError::validation(format!("Malformed custom event: {e}")).with_source(e)
                })?;
                custom.validate()?;
                GatewayEvent::Custom(custom)
            }
            EventKind::Unknown => GatewayEvent::Unknown(event),
        };
        Ok(decoded)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::S3(_) => EventKind::S3,
            GatewayEvent::Http(_) => EventKind::Http,
            GatewayEvent::Custom(_) => EventKind::Custom,
            GatewayEvent::Unknown(_) => EventKind::Unknown,
        }
    }
}
