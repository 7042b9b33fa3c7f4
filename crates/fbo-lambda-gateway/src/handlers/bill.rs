//! HTTP API: bill lookup and creation.

use serde_json::{json, Value};

use fbo_lambda_shared::{create_response, Envelope, HttpRequest};
use fbo_lib::util::safe_json_parse;
use fbo_lib::{AppError, FinanceConfig, Result};

use super::{response_error, InvocationContext};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authorize, then route on the HTTP method.
pub async fn route_http_request(
    request: &HttpRequest,
    ctx: &InvocationContext<'_>,
) -> Result<Envelope> {
    ctx.logger.info(
        "Processing HTTP request",
        Some(json!({ "method": request.method, "path": request.path })),
    )?;

    authorize(request, &ctx.config().finance)?;

    match request.method.as_str() {
        "GET" => get_bill(request.body_text()?.as_deref()),
        "POST" => create_bill(request.body_text()?.as_deref()),
        other => Err(AppError::with_code(
            format!("Unsupported HTTP method: {other}"),
            "METHOD_NOT_ALLOWED",
            405,
        )),
    }
}

/// Missing key is 401, a wrong key is 403.
pub fn authorize(request: &HttpRequest, finance: &FinanceConfig) -> Result<()> {
    match request.header(API_KEY_HEADER) {
        None | Some("") => Err(AppError::with_code("Missing API key", "UNAUTHORIZED", 401)),
        Some(key) if key == finance.api_key => Ok(()),
        Some(_) => Err(AppError::with_code("Invalid API key", "FORBIDDEN", 403)),
    }
}

/// Echo the bill in `payload`. Unparseable payloads echo as `null`.
pub fn get_bill(payload: Option<&str>) -> Result<Envelope> {
    let Some(payload) = payload else {
        return message_only(400, "Bad Request");
    };
    let bill = safe_json_parse(payload).unwrap_or(Value::Null);
    create_response(200, Some("OK"), Some(&json!({ "bill": bill })), None, false)
        .map_err(response_error)
}

pub fn create_bill(payload: Option<&str>) -> Result<Envelope> {
    let Some(payload) = payload else {
        return Err(AppError::validation("Request body is required"));
    };
    let bill = safe_json_parse(payload)
        .filter(Value::is_object)
        .ok_or_else(|| AppError::validation("Request body must be a JSON object"))?;
    create_response(201, Some("Created"), Some(&json!({ "bill": bill })), None, false)
        .map_err(response_error)
}

fn message_only(status: u16, message: &str) -> Result<Envelope> {
    create_response::<Value>(status, Some(message), None, None, false).map_err(response_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbo_lambda_shared::test_utils::{test_config, values};
    use std::collections::HashMap;

    fn request(api_key: Option<&str>) -> HttpRequest {
        let mut headers = HashMap::new();
        if let Some(key) = api_key {
            headers.insert(API_KEY_HEADER.to_string(), key.to_string());
        }
        HttpRequest {
            method: "GET".into(),
            path: "/bills".into(),
            headers,
            ..HttpRequest::default()
        }
    }

    #[test]
    fn test_authorize() {
        let finance = test_config().finance;

        assert!(authorize(&request(Some(values::API_KEY)), &finance).is_ok());

        let missing = authorize(&request(None), &finance).unwrap_err();
        assert_eq!(missing.status_code(), 401);
        assert_eq!(missing.error_code(), "UNAUTHORIZED");

        let empty = authorize(&request(Some("")), &finance).unwrap_err();
        assert_eq!(empty.status_code(), 401);

        let wrong = authorize(&request(Some("nope")), &finance).unwrap_err();
        assert_eq!(wrong.status_code(), 403);
        assert_eq!(wrong.error_code(), "FORBIDDEN");
    }

    #[test]
    fn test_get_bill_without_payload() {
        let response = get_bill(None).unwrap();
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body, r#"{"message":"Bad Request"}"#);
    }

    #[test]
    fn test_get_bill_echoes_payload() {
        let response = get_bill(Some(r#"{"number":42,"billed":true}"#)).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body,
            r#"{"message":"OK","bill":{"number":42,"billed":true}}"#
        );
    }

    #[test]
    fn test_get_bill_unparseable_payload_is_null() {
        let body = get_bill(Some("not json")).unwrap().body_json().unwrap();
        assert!(body["bill"].is_null());
    }

    #[test]
    fn test_create_bill() {
        let response = create_bill(Some(r#"{"number":7}"#)).unwrap();
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body, r#"{"message":"Created","bill":{"number":7}}"#);
    }

    #[test]
    fn test_create_bill_rejects_bad_payloads() {
        assert_eq!(create_bill(None).unwrap_err().status_code(), 400);
        assert_eq!(create_bill(Some("[1]")).unwrap_err().status_code(), 400);
        assert_eq!(create_bill(Some("{")).unwrap_err().status_code(), 400);
    }
}
