//! Direct `{action, data}` invocations.

use serde::Serialize;
use serde_json::{json, Value};

use fbo_lambda_shared::CustomEvent;
use fbo_lib::util::sanitize_file_name;
use fbo_lib::{AppError, Result};

use super::InvocationContext;

pub const HEALTH_CHECK: &str = "health_check";
pub const PROCESS_DATA: &str = "process_data";
pub const DOWNLOAD_BANK_FILES: &str = "download_bank_files";
pub const PROCESS_SPECIFIC_FILE: &str = "process_specific_file";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CustomOutcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

pub async fn process_custom_event(
    event: &CustomEvent,
    ctx: &InvocationContext<'_>,
) -> Result<CustomOutcome> {
    ctx.logger.info(
        "Processing custom event",
        Some(json!({ "action": event.action })),
    )?;

    match event.action.as_str() {
        HEALTH_CHECK => Ok(CustomOutcome {
            message: "Health check passed".to_string(),
            details: Some(json!({
                "service": ctx.config().app.name,
                "environment": ctx.config().app.env.as_str(),
            })),
        }),
        PROCESS_DATA => Ok(CustomOutcome::message("Data processed successfully")),
        DOWNLOAD_BANK_FILES => Ok(CustomOutcome::message(format!(
            "{DOWNLOAD_BANK_FILES} action completed successfully"
        ))),
        PROCESS_SPECIFIC_FILE => process_specific_file(event.data.as_ref(), ctx).await,
        other => Err(AppError::new(format!("Unsupported custom action: {other}"))),
    }
}

/// When `data.fileName` is given the file is checked against the finance
/// upload rules before it is accepted. The accepted name is reported
/// sanitized.
async fn process_specific_file(
    data: Option<&Value>,
    ctx: &InvocationContext<'_>,
) -> Result<CustomOutcome> {
    let message = format!("{PROCESS_SPECIFIC_FILE} action completed successfully");
    let Some(file_name) = data.and_then(|d| d.get("fileName")).and_then(Value::as_str) else {
        return Ok(CustomOutcome::message(message));
    };
    let file_size = data
        .and_then(|d| d.get("fileSize"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let validation = ctx
        .services
        .finance()
        .await?
        .validate_finance_file(file_name, file_size);
    if !validation.valid {
        return Err(AppError::validation(format!("Invalid finance file: {file_name}"))
            .with_detail("errors", validation.errors));
    }

    Ok(CustomOutcome {
        message,
        details: Some(json!({
            "fileName": sanitize_file_name(file_name),
            "fileSize": file_size,
        })),
    })
}
