//! Backend clients.
//!
//! Each client logs a failure once at `error` level and returns the matching
//! [`AppError`](crate::AppError) with the vendor error attached.

pub mod bigquery;
pub mod http;
pub mod mongo;
pub mod postgres;
pub mod s3;

pub use bigquery::{
    BigQueryClient, DatasetOptions, InsertOptions, InsertResult, QueryOptions, QueryResult,
    TableOptions,
};
pub use http::{
    sanitize_headers, HttpClient, HttpClientConfig, HttpClientRegistry, HttpResponse,
    RequestOptions,
};
pub use mongo::{FindManyOptions, MongoClient};
pub use postgres::{PostgresClient, PostgresTransaction, SqlParam};
pub use s3::{FileMetadata, S3Client, UploadOptions};
