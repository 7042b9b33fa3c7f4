//! Response envelope returned by every Lambda invocation.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use fbo_lib::{AppError, ErrorKind};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const POWERED_BY: &str = "X-Powered-By";
pub const POWERED_BY_VALUE: &str = "FBO-Lambda";

/// `{statusCode, headers, body, isBase64Encoded}` as expected by API Gateway.
///
/// `body` is always a serialized JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl Envelope {
    /// Parse the body back into JSON.
    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Build an envelope whose body is `{message, ...body_fields}`.
///
/// `Content-Type: application/json` and `X-Powered-By` are always set;
/// `headers` are applied on top and win on an identical key. `body_fields`
/// must serialize to a JSON object (or `null`); anything else is an error, as
/// is any serialization failure.
///
/// # Example
///
/// ```
/// use fbo_lambda_shared::create_response;
/// use serde_json::json;
///
/// let response = create_response(201, Some("Created"), Some(&json!({ "id": 5 })), None, false)?;
/// assert_eq!(response.body, r#"{"message":"Created","id":5}"#);
/// # Ok::<(), serde_json::Error>(())
/// ```
pub fn create_response<T: Serialize + ?Sized>(
    status_code: u16,
    message: Option<&str>,
    body_fields: Option<&T>,
    headers: Option<HashMap<String, String>>,
    is_base64_encoded: bool,
) -> Result<Envelope, serde_json::Error> {
    let mut body = Map::new();
    if let Some(message) = message {
        body.insert("message".into(), message.into());
    }

    match body_fields.map(serde_json::to_value).transpose()? {
        None | Some(Value::Null) => {}
        Some(Value::Object(fields)) => body.extend(fields),
        Some(_) => {
            return Err(serde_json::Error::custom(
                "response body fields must serialize to a JSON object",
            ))
        }
    }

    Ok(envelope(status_code, body, headers, is_base64_encoded))
}

/// `{message?, success: true, data, timestamp}`.
pub fn success_response<T: Serialize + ?Sized>(
    data: &T,
    message: Option<&str>,
    status_code: u16,
) -> Result<Envelope, serde_json::Error> {
    let mut body = Map::new();
    if let Some(message) = message {
        body.insert("message".into(), message.into());
    }
    body.insert("success".into(), Value::Bool(true));
    body.insert("data".into(), serde_json::to_value(data)?);
    body.insert("timestamp".into(), timestamp().into());
    Ok(envelope(status_code, body, None, false))
}

/// `{message, success: false, timestamp, error: {code, message, details?}}`.
///
/// `code` defaults to `INTERNAL_ERROR`.
pub fn error_response(
    message: &str,
    status_code: u16,
    code: Option<&str>,
    details: Option<Value>,
) -> Envelope {
    let mut error = Map::new();
    error.insert("code".into(), code.unwrap_or("INTERNAL_ERROR").into());
    error.insert("message".into(), message.into());
    if let Some(details) = details {
        error.insert("details".into(), details);
    }

    let mut body = Map::new();
    body.insert("message".into(), message.into());
    body.insert("success".into(), Value::Bool(false));
    body.insert("timestamp".into(), timestamp().into());
    body.insert("error".into(), Value::Object(error));
    envelope(status_code, body, None, false)
}

/// Convert any error into a failure envelope.
///
/// The top-level `message` is the generic reason phrase for the status code;
/// the error's own code and message go under `error`. Details are exposed for
/// validation errors only, and the source chain never leaves the process.
pub fn failure_response(err: &AppError) -> Envelope {
    let status = err.status_code();
    let generic = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error");

    let details = match err.kind() {
        ErrorKind::Validation if !err.details().is_empty() => {
            Some(Value::Object(err.details().clone()))
        }
        _ => None,
    };

    let mut error = Map::new();
    error.insert("code".into(), err.error_code().into());
    error.insert("message".into(), err.message().into());
    if let Some(details) = details {
        error.insert("details".into(), details);
    }

    let mut body = Map::new();
    body.insert("message".into(), generic.into());
    body.insert("success".into(), Value::Bool(false));
    body.insert("timestamp".into(), timestamp().into());
    body.insert("error".into(), Value::Object(error));
    envelope(status, body, None, false)
}

fn envelope(
    status_code: u16,
    body: Map<String, Value>,
    headers: Option<HashMap<String, String>>,
    is_base64_encoded: bool,
) -> Envelope {
    let mut all_headers = HashMap::from([
        (CONTENT_TYPE.to_string(), "application/json".to_string()),
        (POWERED_BY.to_string(), POWERED_BY_VALUE.to_string()),
    ]);
    all_headers.extend(headers.unwrap_or_default());

    Envelope {
        status_code,
        headers: all_headers,
        body: Value::Object(body).to_string(),
        is_base64_encoded,
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Created {
        id: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    #[test]
    fn test_message_only_body() {
        let response = create_response::<Value>(200, Some("OK"), None, None, false).unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, r#"{"message":"OK"}"#);
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers[POWERED_BY], POWERED_BY_VALUE);
        assert!(!response.is_base64_encoded);
    }

    #[test]
    fn test_message_comes_first_and_none_fields_dropped() {
        let fields = Created { id: 5, note: None };
        let response = create_response(201, Some("Created"), Some(&fields), None, false).unwrap();

        assert_eq!(response.body, r#"{"message":"Created","id":5}"#);
    }

    #[test]
    fn test_header_override_and_addition() {
        let headers = HashMap::from([
            (CONTENT_TYPE.to_string(), "text/csv".to_string()),
            ("X-Request-Id".to_string(), "r1".to_string()),
        ]);
        let response =
            create_response::<Value>(200, Some("OK"), None, Some(headers), false).unwrap();

        assert_eq!(response.headers[CONTENT_TYPE], "text/csv");
        assert_eq!(response.headers["X-Request-Id"], "r1");
        assert_eq!(response.headers[POWERED_BY], POWERED_BY_VALUE);
        assert_eq!(response.headers.len(), 3);
    }

    #[test]
    fn test_differently_cased_header_is_additive() {
        let headers = HashMap::from([("content-type".to_string(), "text/plain".to_string())]);
        let response =
            create_response::<Value>(200, Some("OK"), None, Some(headers), false).unwrap();

        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers["content-type"], "text/plain");
    }

    #[test]
    fn test_non_object_body_fields_rejected() {
        let err = create_response(200, Some("OK"), Some(&json!([1, 2])), None, false).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_serialization_failure_propagates() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        assert!(create_response(200, Some("OK"), Some(&bad), None, false).is_err());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let response = create_response::<Value>(204, Some("Done"), None, None, true).unwrap();
        let wire = serde_json::to_value(&response).unwrap();

        assert_eq!(wire["statusCode"], 204);
        assert_eq!(wire["isBase64Encoded"], true);
        assert!(wire["body"].is_string());
        assert!(wire["headers"].is_object());
    }

    #[test]
    fn test_success_response_shape() {
        let response = success_response(&json!({ "processedItems": 2 }), None, 200).unwrap();
        let body = response.body_json().unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["processedItems"], 2);
        assert!(body.get("message").is_none());
        assert!(body["timestamp"].is_string());
        assert!(response.is_success());
    }

    #[test]
    fn test_error_response_defaults_code() {
        let response = error_response("Something broke", 500, None, None);
        let body = response.body_json().unwrap();

        assert_eq!(response.status_code, 500);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "Something broke");
        assert!(body["error"].get("details").is_none());
    }

    #[test]
    fn test_failure_hides_internal_message_at_top_level() {
        let err = AppError::postgres("Connection refused on 10.0.0.4")
            .with_detail("query", "SELECT secret FROM t");
        let response = failure_response(&err);
        let body = response.body_json().unwrap();

        assert_eq!(response.status_code, 500);
        assert_eq!(body["message"], "Internal Server Error");
        assert_eq!(body["error"]["code"], "POSTGRES_ERROR");
        assert_eq!(body["error"]["message"], "Connection refused on 10.0.0.4");
        assert!(body["error"].get("details").is_none());
        assert!(!response.body.contains("caused by"));
    }

    #[test]
    fn test_failure_exposes_validation_details() {
        let err = AppError::validation("Invalid bill").with_detail("field", "amount");
        let response = failure_response(&err);
        let body = response.body_json().unwrap();

        assert_eq!(response.status_code, 400);
        assert_eq!(body["message"], "Bad Request");
        assert_eq!(body["error"]["details"]["field"], "amount");
    }

    #[test]
    fn test_failure_custom_status() {
        let err = AppError::with_code("Unsupported HTTP method: PATCH", "METHOD_NOT_ALLOWED", 405);
        let response = failure_response(&err);
        let body = response.body_json().unwrap();

        assert_eq!(response.status_code, 405);
        assert_eq!(body["message"], "Method Not Allowed");
        assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
        assert_eq!(response.headers[POWERED_BY], POWERED_BY_VALUE);
    }
}
