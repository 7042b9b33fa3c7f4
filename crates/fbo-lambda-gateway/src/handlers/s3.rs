//! Object-storage notifications.

use serde::Serialize;
use serde_json::json;

use fbo_lambda_shared::S3Event;
use fbo_lib::Result;

use super::InvocationContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Outcome {
    pub message: String,
    pub processed_items: usize,
    pub skipped_items: usize,
}

/// Log every record; records from buckets outside the allow-list are skipped.
pub async fn process_s3_event(event: &S3Event, ctx: &InvocationContext<'_>) -> Result<S3Outcome> {
    ctx.logger.info(
        "Processing S3 event",
        Some(json!({ "recordCount": event.records.len() })),
    )?;

    let aws = &ctx.config().aws;
    let mut processed_items = 0;
    let mut skipped_items = 0;

    for record in &event.records {
        let bucket = &record.s3.bucket.name;
        let key = &record.s3.object.key;

        if !aws.is_bucket_allowed(bucket) {
            ctx.logger.warn(
                "Skipping S3 object from unauthorized bucket",
                Some(json!({ "bucketName": bucket, "objectKey": key })),
            )?;
            skipped_items += 1;
            continue;
        }

        ctx.logger.info(
            "Processing S3 object",
            Some(json!({
                "bucketName": bucket,
                "objectKey": key,
                "size": record.s3.object.size,
                "eventName": record.event_name,
            })),
        )?;
        processed_items += 1;
    }

    Ok(S3Outcome {
        message: "S3 event processed successfully".to_string(),
        processed_items,
        skipped_items,
    })
}
