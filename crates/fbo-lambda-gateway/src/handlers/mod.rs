//! Per-event-type handlers.
//!
//! Each decoded [`GatewayEvent`] variant maps to exactly one handler.

pub mod bill;
pub mod custom;
pub mod s3;

use serde::Serialize;
use serde_json::json;

use fbo_lambda_shared::{success_response, Envelope, EventKind, GatewayEvent, ServiceContainer};
use fbo_lib::{AppError, Config, Logger, Result};

/// Everything a handler may touch during one invocation.
pub struct InvocationContext<'a> {
    pub request_id: String,
    pub function_name: String,
    pub logger: Logger,
    pub services: &'a ServiceContainer,
}

impl InvocationContext<'_> {
    pub fn config(&self) -> &Config {
        self.services.config()
    }
}

/// Route a decoded event to its handler.
pub async fn dispatch(event: GatewayEvent, ctx: &InvocationContext<'_>) -> Result<Envelope> {
    ctx.logger
        .info("Processing event", Some(json!({ "eventType": event.kind().as_str() })))?;

    match event {
        GatewayEvent::S3(event) => ok(&s3::process_s3_event(&event, ctx).await?),
        GatewayEvent::Http(request) => bill::route_http_request(&request, ctx).await,
        GatewayEvent::Custom(event) => ok(&custom::process_custom_event(&event, ctx).await?),
        GatewayEvent::Unknown(_) => Err(AppError::new(format!(
            "Unsupported event type: {}",
            EventKind::Unknown
        ))),
    }
}

fn ok<T: Serialize>(result: &T) -> Result<Envelope> {
    success_response(result, None, 200).map_err(response_error)
}

pub(crate) fn response_error(err: serde_json::Error) -> AppError {
    AppError::new("Failed to serialize response").with_source(err)
}
