//! AWS Lambda gateway.
//!
//! Classifies each inbound event (S3 notification, HTTP API request or custom
//! `{action}` payload), dispatches it to its handler and always answers with
//! an [`Envelope`]. Handler failures become failure envelopes; the runtime
//! never sees an `Err` from [`handler`].

#![deny(warnings)]

pub mod handlers;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use tracing::{error, warn};

use fbo_lambda_shared::{
    classify, failure_response, init_tracing, Envelope, GatewayEvent, ServiceContainer,
};
use fbo_lib::{AppError, Config};

use handlers::{dispatch, InvocationContext};

/// Entry point used by the Lambda runtime.
///
/// Configuration is validated once per cold start; an invalid environment
/// aborts the process before any event is accepted.
pub async fn run() -> Result<(), Error> {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, details = %json!(e.details()), "invalid configuration");
            return Err(e.into());
        }
    };
    let services = Arc::new(ServiceContainer::new(config));

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let services = Arc::clone(&services);
        async move { handler(event, &services).await }
    }))
    .await
}

/// Lambda handler invoked per request.
pub async fn handler(
    event: LambdaEvent<Value>,
    services: &ServiceContainer,
) -> Result<Envelope, Error> {
    let payload = event.payload;
    let context = event.context;
    let logger = services
        .logger()
        .clone()
        .with_request_id(context.request_id.clone());
    let ctx = InvocationContext {
        request_id: context.request_id.clone(),
        function_name: context.env_config.function_name.clone(),
        logger,
        services,
    };

    let event_type = classify(&payload);
    let invoked = ctx.logger.info(
        "Lambda function invoked",
        Some(json!({
            "eventType": event_type.as_str(),
            "requestId": ctx.request_id,
            "functionName": ctx.function_name,
            "functionVersion": context.env_config.version,
            "remainingTimeInMillis": remaining_millis(context.deadline),
        })),
    );

    let outcome = match invoked {
        Ok(()) => match GatewayEvent::decode(payload) {
            Ok(event) => dispatch(event, &ctx).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(AppError::from(e)),
    };

    match outcome {
        Ok(response) => {
            log_or_trace(ctx.logger.info(
                "Lambda function completed successfully",
                Some(json!({
                    "requestId": ctx.request_id,
                    "statusCode": response.status_code,
                })),
            ));
            Ok(response)
        }
        Err(err) => {
            log_or_trace(ctx.logger.error(
                "Lambda function failed",
                Some(&err),
                Some(json!({
                    "requestId": ctx.request_id,
                    "errorMessage": err.message(),
                })),
            ));
            Ok(failure_response(&err))
        }
    }
}

/// Milliseconds until the invocation deadline; zero when already past.
fn remaining_millis(deadline_ms: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    deadline_ms.saturating_sub(now)
}

/// The response is already decided; a lost record goes to tracing instead.
fn log_or_trace(result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "failed to write application log record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_millis_past_deadline() {
        assert_eq!(remaining_millis(0), 0);
    }

    #[test]
    fn test_remaining_millis_future_deadline() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let remaining = remaining_millis(now + 30_000);
        assert!(remaining > 29_000 && remaining <= 30_000);
    }
}
