//! Shared infrastructure for FBO AWS Lambda functions.
//!
//! This crate provides common functionality used across all Lambda handlers:
//!
//! - [`ServiceContainer`]: per-process configuration, logger and lazily-built backend clients
//! - [`init_tracing`]: JSON-formatted tracing for CloudWatch Logs
//! - [`Envelope`] and the response builders: the uniform `{statusCode, headers, body}` result
//! - [`GatewayEvent`]: ordered classification and decoding of inbound payloads
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides a test environment, sample events and mock
//! request ids. Enable the `test-utils` feature to access it from dependent crates.

#![deny(warnings)]

mod events;
mod response;
mod runtime;
mod tracing_init;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use events::{
    classify, CustomEvent, EventKind, GatewayEvent, HttpRequest, S3Bucket, S3Entity, S3Event,
    S3EventRecord, S3Object, Validate,
};
pub use response::{
    create_response, error_response, failure_response, success_response, Envelope, CONTENT_TYPE,
    POWERED_BY, POWERED_BY_VALUE,
};
pub use runtime::{ServiceContainer, ROOT_SERVICE};
pub use tracing_init::{init_tracing, LogFormat};
