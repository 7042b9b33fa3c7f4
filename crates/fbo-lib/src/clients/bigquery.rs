//! BigQuery client.
//!
//! Request models are patched from JSON so options map one-to-one onto the
//! REST field names (`useLegacySql`, `maximumBytesBilled`, ...).

use std::collections::HashMap;
use std::time::Duration;

use gcp_bigquery_client::dataset::ListOptions;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::dataset::Dataset;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::yup_oauth2;
use gcp_bigquery_client::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::config::BigQueryConfig;
use crate::error::{AppError, Result};
use crate::logger::Logger;
use crate::retry::retry_with_backoff;
use crate::util::truncate_string;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides the configured location.
    pub location: Option<String>,
    pub use_legacy_sql: bool,
    pub dry_run: bool,
    pub max_results: Option<u32>,
    pub labels: HashMap<String, String>,
    pub maximum_bytes_billed: Option<u64>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub ignore_unknown_values: bool,
    pub skip_invalid_rows: bool,
    pub template_suffix: Option<String>,
    /// Generate an insert id per row for best-effort deduplication.
    pub generate_insert_ids: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    pub description: Option<String>,
    pub labels: HashMap<String, String>,
    /// Raw `timePartitioning` object, e.g. `{"type": "DAY", "field": "created_at"}`.
    pub time_partitioning: Option<Value>,
    pub clustering_fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    /// Overrides the configured location.
    pub location: Option<String>,
    pub description: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Rows and statistics of a completed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub total_rows: u64,
    pub job_complete: bool,
    pub total_bytes_processed: Option<u64>,
    pub cache_hit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResult {
    pub inserted_rows: usize,
    /// Per-row failures reported by the streaming API.
    pub insert_errors: Vec<Value>,
}

pub struct BigQueryClient {
    config: BigQueryConfig,
    client: Mutex<Option<Client>>,
    logger: Logger,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig, logger: &Logger) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            logger: logger.child("bigquery"),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Authenticate and verify access by listing one dataset. Idempotent.
    ///
    /// Credentials are taken from the key file, then inline credentials, then
    /// application default credentials.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let client = match self.authenticate().await {
            Ok(client) => client,
            Err(err) => return self.fail("BigQuery connection failed", err),
        };

        if let Err(e) = client
            .dataset()
            .list(&self.config.project_id, ListOptions::default().max_results(1))
            .await
        {
            let err = AppError::bigquery("Failed to connect to BigQuery")
                .with_detail("projectId", self.config.project_id.clone())
                .with_source(e);
            return self.fail("BigQuery connection failed", err);
        }

        self.logger.info(
            "Connected to BigQuery",
            Some(json!({
                "projectId": self.config.project_id,
                "location": self.config.location,
            })),
        )?;
        *guard = Some(client);
        Ok(())
    }

    async fn authenticate(&self) -> Result<Client> {
        let result = if let Some(path) = &self.config.key_filename {
            Client::from_service_account_key_file(path).await
        } else if let Some(creds) = &self.config.credentials {
            let key = yup_oauth2::parse_service_account_key(
                json!({
                    "type": "service_account",
                    "project_id": self.config.project_id,
                    "client_email": creds.client_email,
                    "private_key": creds.private_key,
                    "token_uri": "https://oauth2.googleapis.com/token",
                })
                .to_string(),
            )
            .map_err(|e| {
                AppError::bigquery("Invalid BigQuery service account credentials").with_source(e)
            })?;
            Client::from_service_account_key(key, false).await
        } else {
            Client::from_application_default_credentials().await
        };

        result.map_err(|e| AppError::bigquery("Failed to authenticate with BigQuery").with_source(e))
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    pub async fn disconnect(&self) -> Result<()> {
        if self.client.lock().await.take().is_some() {
            self.logger.info("Disconnected from BigQuery", None)?;
        }
        Ok(())
    }

    async fn client(&self) -> Result<Client> {
        self.connect().await?;
        match self.client.lock().await.as_ref() {
            Some(client) => Ok(client.clone()),
            None => Err(AppError::bigquery("BigQuery client not initialized")),
        }
    }

    /// Run a SQL query. Rows are objects keyed by column name.
    pub async fn query(&self, sql: &str, options: QueryOptions) -> Result<QueryResult> {
        let client = self.client().await?;
        let request: QueryRequest = patch_model(
            QueryRequest::new(sql),
            json!({
                "location": options.location.clone().unwrap_or_else(|| self.config.location.clone()),
                "useLegacySql": options.use_legacy_sql,
                "dryRun": options.dry_run,
                "maxResults": options.max_results,
                "labels": (!options.labels.is_empty()).then_some(&options.labels),
                "maximumBytesBilled": options.maximum_bytes_billed.map(|b| b.to_string()),
                "timeoutMs": options.timeout.map(|t| t.as_millis() as u64),
            }),
        )?;

        let max_retries = if self.config.auto_retry {
            self.config.max_retries as i32
        } else {
            0
        };
        let project_id = self.config.project_id.as_str();
        let outcome = retry_with_backoff(
            || client.job().query(project_id, request.clone()),
            max_retries,
            RETRY_BASE_DELAY,
            RETRY_MAX_DELAY,
        )
        .await;

        let result_set = match outcome {
            Ok(rs) => rs,
            Err(e) => {
                let mut err = AppError::bigquery("BigQuery query failed")
                    .with_detail("query", truncate_string(sql, 100));
                if let Some(source) = e.into_operation() {
                    err = err.with_source(source);
                }
                return self.fail("BigQuery query failed", err);
            }
        };

        let result = read_query_response(&result_set)?;

        self.logger.debug(
            "BigQuery query executed",
            Some(json!({
                "query": truncate_string(sql, 100),
                "rowCount": result.rows.len(),
                "bytesProcessed": result.total_bytes_processed,
            })),
        )?;
        Ok(result)
    }

    /// Stream rows into a table.
    pub async fn insert<T: Serialize>(
        &self,
        dataset_id: &str,
        table_id: &str,
        rows: &[T],
        options: InsertOptions,
    ) -> Result<InsertResult> {
        if rows.is_empty() {
            return Ok(InsertResult {
                inserted_rows: 0,
                insert_errors: Vec::new(),
            });
        }

        let mut request = TableDataInsertAllRequest::new();
        if options.ignore_unknown_values {
            request.ignore_unknown_values();
        }
        if options.skip_invalid_rows {
            request.skip_invalid_rows();
        }
        if let Some(suffix) = &options.template_suffix {
            request.template_suffix(suffix.clone());
        }
        for row in rows {
            let insert_id = options
                .generate_insert_ids
                .then(|| uuid::Uuid::new_v4().to_string());
            request.add_row(insert_id, row).map_err(|e| {
                AppError::bigquery("Failed to encode BigQuery row").with_source(e)
            })?;
        }

        let client = self.client().await?;
        let response = match client
            .tabledata()
            .insert_all(&self.config.project_id, dataset_id, table_id, request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = AppError::bigquery(format!("BigQuery insert into {table_id} failed"))
                    .with_details(json!({ "datasetId": dataset_id, "tableId": table_id }))
                    .with_source(e);
                return self.fail("BigQuery insert failed", err);
            }
        };

        let insert_errors = serde_json::to_value(&response)
            .ok()
            .and_then(|v| v.get("insertErrors").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        if !insert_errors.is_empty() {
            self.logger.warn(
                "BigQuery insert reported row errors",
                Some(json!({ "tableId": table_id, "errorCount": insert_errors.len() })),
            )?;
        }

        Ok(InsertResult {
            inserted_rows: rows.len() - insert_errors.len().min(rows.len()),
            insert_errors,
        })
    }

    /// Create a table. `fields` are REST schema fields, e.g.
    /// `{"name": "amount", "type": "NUMERIC", "mode": "REQUIRED"}`.
    pub async fn create_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        fields: Vec<Value>,
        options: TableOptions,
    ) -> Result<Value> {
        let schema: TableSchema = from_json(json!({ "fields": fields }))?;
        let mut extra = Map::new();
        if let Some(description) = &options.description {
            extra.insert("description".into(), json!(description));
        }
        if !options.labels.is_empty() {
            extra.insert("labels".into(), json!(options.labels));
        }
        if let Some(partitioning) = &options.time_partitioning {
            extra.insert("timePartitioning".into(), partitioning.clone());
        }
        if !options.clustering_fields.is_empty() {
            extra.insert(
                "clustering".into(),
                json!({ "fields": options.clustering_fields }),
            );
        }
        let table: Table = patch_model(
            Table::new(&self.config.project_id, dataset_id, table_id, schema),
            Value::Object(extra),
        )?;

        let client = self.client().await?;
        match client.table().create(table).await {
            Ok(created) => {
                self.logger.info(
                    "BigQuery table created",
                    Some(json!({ "datasetId": dataset_id, "tableId": table_id })),
                )?;
                to_json(&created)
            }
            Err(e) => self.resource_failed("create table", dataset_id, Some(table_id), e),
        }
    }

    pub async fn delete_table(&self, dataset_id: &str, table_id: &str) -> Result<()> {
        let client = self.client().await?;
        match client
            .table()
            .delete(&self.config.project_id, dataset_id, table_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.resource_failed("delete table", dataset_id, Some(table_id), e),
        }
    }

    pub async fn table_exists(&self, dataset_id: &str, table_id: &str) -> Result<bool> {
        let client = self.client().await?;
        match client
            .table()
            .get(&self.config.project_id, dataset_id, table_id, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => self.resource_failed("get table", dataset_id, Some(table_id), e),
        }
    }

    /// Table resource as returned by the REST API.
    pub async fn get_table_metadata(&self, dataset_id: &str, table_id: &str) -> Result<Value> {
        let client = self.client().await?;
        match client
            .table()
            .get(&self.config.project_id, dataset_id, table_id, None)
            .await
        {
            Ok(table) => to_json(&table),
            Err(e) => self.resource_failed("get table", dataset_id, Some(table_id), e),
        }
    }

    pub async fn create_dataset(&self, dataset_id: &str, options: DatasetOptions) -> Result<Value> {
        let mut extra = Map::new();
        extra.insert(
            "location".into(),
            json!(options.location.unwrap_or_else(|| self.config.location.clone())),
        );
        if let Some(description) = &options.description {
            extra.insert("description".into(), json!(description));
        }
        if !options.labels.is_empty() {
            extra.insert("labels".into(), json!(options.labels));
        }
        let dataset: Dataset = patch_model(
            Dataset::new(&self.config.project_id, dataset_id),
            Value::Object(extra),
        )?;

        let client = self.client().await?;
        match client.dataset().create(dataset).await {
            Ok(created) => {
                self.logger.info(
                    "BigQuery dataset created",
                    Some(json!({ "datasetId": dataset_id })),
                )?;
                to_json(&created)
            }
            Err(e) => self.resource_failed("create dataset", dataset_id, None, e),
        }
    }

    /// Delete a dataset; `force` also deletes its tables.
    pub async fn delete_dataset(&self, dataset_id: &str, force: bool) -> Result<()> {
        let client = self.client().await?;
        match client
            .dataset()
            .delete(&self.config.project_id, dataset_id, force)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.resource_failed("delete dataset", dataset_id, None, e),
        }
    }

    pub async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        let client = self.client().await?;
        match client
            .dataset()
            .get(&self.config.project_id, dataset_id)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => self.resource_failed("get dataset", dataset_id, None, e),
        }
    }

    fn resource_failed<T>(
        &self,
        operation: &str,
        dataset_id: &str,
        table_id: Option<&str>,
        e: BQError,
    ) -> Result<T> {
        let target = match table_id {
            Some(table) => format!("{dataset_id}.{table}"),
            None => dataset_id.to_string(),
        };
        let err = AppError::bigquery(format!("BigQuery {operation} failed for {target}"))
            .with_details(json!({ "datasetId": dataset_id, "tableId": table_id }))
            .with_source(e);
        self.fail("BigQuery operation failed", err)
    }

    fn fail<T>(&self, message: &str, err: AppError) -> Result<T> {
        Err(self.logger.report(message, err, None))
    }
}

fn is_not_found(err: &BQError) -> bool {
    matches!(err, BQError::ResponseError { error } if error.error.code == 404)
}

fn to_json<T: Serialize>(model: &T) -> Result<Value> {
    serde_json::to_value(model)
        .map_err(|e| AppError::bigquery("Failed to encode BigQuery resource").with_source(e))
}

fn from_json<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::validation(format!("invalid BigQuery resource: {e}")).with_source(e))
}

/// Overlay the non-null fields of `patch` onto the JSON form of `base`.
fn patch_model<T: Serialize + DeserializeOwned>(base: T, patch: Value) -> Result<T> {
    let mut value = to_json(&base)?;
    if let (Value::Object(target), Value::Object(fields)) = (&mut value, patch) {
        for (key, field) in fields {
            if !field.is_null() {
                target.insert(key, field);
            }
        }
    }
    from_json(value)
}

/// Convert a REST `QueryResponse` into row objects using the schema.
fn read_query_response(response: &QueryResponse) -> Result<QueryResult> {
    let response = serde_json::to_value(response).map_err(|e| {
        AppError::bigquery("Failed to read BigQuery query response").with_source(e)
    })?;
    Ok(parse_query_response(&response))
}

fn parse_query_response(response: &Value) -> QueryResult {
    let fields: Vec<(String, String)> = response["schema"]["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .map(|f| {
                    (
                        f["name"].as_str().unwrap_or_default().to_string(),
                        f["type"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Value> = response["rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let cells = row["f"].as_array().cloned().unwrap_or_default();
                    let object: Map<String, Value> = fields
                        .iter()
                        .zip(cells)
                        .map(|((name, kind), cell)| (name.clone(), convert_cell(kind, &cell["v"])))
                        .collect();
                    Value::Object(object)
                })
                .collect()
        })
        .unwrap_or_default();

    let as_u64 = |v: &Value| match v {
        Value::String(s) => s.parse::<u64>().ok(),
        other => other.as_u64(),
    };

    QueryResult {
        total_rows: as_u64(&response["totalRows"]).unwrap_or(rows.len() as u64),
        job_complete: response["jobComplete"].as_bool().unwrap_or(true),
        total_bytes_processed: as_u64(&response["totalBytesProcessed"]),
        cache_hit: response["cacheHit"].as_bool(),
        rows,
    }
}

/// BigQuery returns scalars as strings; restore numbers and booleans.
fn convert_cell(kind: &str, value: &Value) -> Value {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    match kind {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(text)),
        "FLOAT" | "FLOAT64" => text.parse::<f64>().map(Value::from).unwrap_or_else(|_| json!(text)),
        "BOOLEAN" | "BOOL" => Value::Bool(text == "true"),
        _ => json!(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_response_applies_schema() {
        let response = json!({
            "schema": { "fields": [
                { "name": "id", "type": "INTEGER" },
                { "name": "amount", "type": "FLOAT" },
                { "name": "paid", "type": "BOOLEAN" },
                { "name": "vendor", "type": "STRING" },
            ]},
            "rows": [
                { "f": [ { "v": "1" }, { "v": "10.5" }, { "v": "true" }, { "v": "ACME" } ] },
                { "f": [ { "v": "2" }, { "v": null }, { "v": "false" }, { "v": "Globex" } ] },
            ],
            "totalRows": "2",
            "jobComplete": true,
            "totalBytesProcessed": "1024",
            "cacheHit": false,
        });

        let result = parse_query_response(&response);

        assert_eq!(result.total_rows, 2);
        assert_eq!(result.total_bytes_processed, Some(1024));
        assert_eq!(result.cache_hit, Some(false));
        assert_eq!(
            result.rows[0],
            json!({ "id": 1, "amount": 10.5, "paid": true, "vendor": "ACME" })
        );
        assert_eq!(result.rows[1]["amount"], Value::Null);
        assert_eq!(result.rows[1]["paid"], false);
    }

    #[test]
    fn test_read_typed_query_response() {
        let response: QueryResponse = from_json(json!({
            "kind": "bigquery#queryResponse",
            "schema": { "fields": [
                { "name": "invoice", "type": "STRING" },
                { "name": "total", "type": "INTEGER" },
            ]},
            "rows": [ { "f": [ { "v": "INV-1" }, { "v": "250" } ] } ],
            "totalRows": "1",
            "jobComplete": true,
            "totalBytesProcessed": "64",
        }))
        .unwrap();

        let result = read_query_response(&response).unwrap();

        assert_eq!(result.total_rows, 1);
        assert!(result.job_complete);
        assert_eq!(result.total_bytes_processed, Some(64));
        assert_eq!(result.rows, vec![json!({ "invoice": "INV-1", "total": 250 })]);
    }

    #[test]
    fn test_parse_empty_response() {
        let result = parse_query_response(&json!({ "jobComplete": false }));
        assert!(result.rows.is_empty());
        assert_eq!(result.total_rows, 0);
        assert!(!result.job_complete);
    }

    #[test]
    fn test_convert_cell_keeps_unparseable_text() {
        assert_eq!(convert_cell("INTEGER", &json!("abc")), json!("abc"));
        assert_eq!(convert_cell("TIMESTAMP", &json!("1.7E9")), json!("1.7E9"));
        assert_eq!(convert_cell("RECORD", &json!({ "f": [] })), json!({ "f": [] }));
    }

    #[tokio::test]
    async fn test_missing_key_file_is_bigquery_error() {
        let config = BigQueryConfig {
            project_id: "fbo-project".into(),
            dataset_id: "billing".into(),
            location: "US".into(),
            key_filename: Some("/nonexistent/fbo-key.json".into()),
            credentials: None,
            max_retries: 1,
            auto_retry: false,
        };
        let sink = crate::logger::MemorySink::new();
        let client = BigQueryClient::new(
            config,
            &Logger::with_sink("test", std::sync::Arc::new(sink.clone())),
        );

        let err = client.connect().await.unwrap_err();

        assert_eq!(err.error_code(), crate::error::BIGQUERY_ERROR);
        assert!(err.is_database());
        assert!(!client.is_connected().await);
        assert_eq!(sink.records()[0]["service"], "test:bigquery");
    }

    #[tokio::test]
    async fn test_malformed_key_file_is_bigquery_error() {
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut key_file, b"{ not a service account").unwrap();

        let config = BigQueryConfig {
            project_id: "fbo-project".into(),
            dataset_id: "billing".into(),
            location: "US".into(),
            key_filename: Some(key_file.path().display().to_string()),
            credentials: None,
            max_retries: 1,
            auto_retry: false,
        };
        let client = BigQueryClient::new(
            config,
            &Logger::with_sink("test", std::sync::Arc::new(crate::logger::MemorySink::new())),
        );

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.message(), "Failed to authenticate with BigQuery");
        assert!(err.details().contains_key("error"));
    }
}
