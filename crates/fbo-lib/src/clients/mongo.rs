//! MongoDB client.
//!
//! Filters, updates and documents are plain JSON objects; results come back
//! as relaxed extended JSON (`ObjectId` renders as `{"$oid": "..."}`).

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::MongoConfig;
use crate::error::{AppError, Result};
use crate::logger::Logger;

pub const NOT_CONNECTED: &str = "Database connection not established. Call connect() first.";

/// Options for [`MongoClient::find_many`].
#[derive(Debug, Clone, Default)]
pub struct FindManyOptions {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    /// e.g. `{"createdAt": -1}`
    pub sort: Option<Value>,
    pub projection: Option<Value>,
}

pub struct MongoClient {
    config: MongoConfig,
    client: Mutex<Option<Client>>,
    logger: Logger,
}

impl MongoClient {
    pub fn new(config: MongoConfig, logger: &Logger) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            logger: logger.child("mongo"),
        }
    }

    /// Build the connection pool and ping the server. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut options = match ClientOptions::parse(&self.config.uri).await {
            Ok(options) => options,
            Err(e) => {
                let err = AppError::mongo("Invalid MongoDB connection string").with_source(e);
                return self.fail("MongoDB connection failed", err);
            }
        };
        options.max_pool_size = Some(self.config.max_pool_size);
        options.min_pool_size = Some(self.config.min_pool_size);
        options.max_idle_time = Some(self.config.max_idle_time);
        options.server_selection_timeout = Some(self.config.server_selection_timeout);

        let client = match Client::with_options(options) {
            Ok(client) => client,
            Err(e) => {
                let err = AppError::mongo("Failed to connect to MongoDB").with_source(e);
                return self.fail("MongoDB connection failed", err);
            }
        };

        if let Err(e) = client
            .database(&self.config.database)
            .run_command(doc! { "ping": 1 })
            .await
        {
            let err = AppError::mongo("Failed to connect to MongoDB")
                .with_detail("database", self.config.database.clone())
                .with_source(e);
            return self.fail("MongoDB connection failed", err);
        }

        self.logger.info(
            "Connected to MongoDB",
            Some(json!({
                "database": self.config.database,
                "maxPoolSize": self.config.max_pool_size,
            })),
        )?;
        *guard = Some(client);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Shut down the pool for every holder of this client.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.shutdown().await;
            self.logger.info("Disconnected from MongoDB", None)?;
        }
        Ok(())
    }

    async fn database(&self) -> Result<Database> {
        match self.client.lock().await.as_ref() {
            Some(client) => Ok(client.database(&self.config.database)),
            None => Err(AppError::mongo(NOT_CONNECTED)),
        }
    }

    async fn collection(&self, name: &str) -> Result<Collection<Document>> {
        Ok(self.database().await?.collection::<Document>(name))
    }

    pub async fn find_one<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<Option<T>> {
        let filter = to_document("filter", filter)?;
        let coll = self.collection(collection).await?;
        match coll.find_one(filter).await {
            Ok(Some(found)) => decode(found).map(Some),
            Ok(None) => Ok(None),
            Err(e) => self.op_failed("findOne", collection, e),
        }
    }

    pub async fn find_many<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &Value,
        options: FindManyOptions,
    ) -> Result<Vec<T>> {
        let filter = to_document("filter", filter)?;
        let mut find_options = FindOptions::default();
        find_options.limit = options.limit;
        find_options.skip = options.skip;
        find_options.sort = options
            .sort
            .as_ref()
            .map(|s| to_document("sort", s))
            .transpose()?;
        find_options.projection = options
            .projection
            .as_ref()
            .map(|p| to_document("projection", p))
            .transpose()?;

        let coll = self.collection(collection).await?;
        let cursor = match coll.find(filter).with_options(find_options).await {
            Ok(cursor) => cursor,
            Err(e) => return self.op_failed("find", collection, e),
        };
        match cursor.try_collect::<Vec<Document>>().await {
            Ok(docs) => docs.into_iter().map(decode).collect(),
            Err(e) => self.op_failed("find", collection, e),
        }
    }

    /// Insert a document and return it with its `_id`.
    pub async fn insert_one(&self, collection: &str, document: &Value) -> Result<Value> {
        let mut document = to_document("document", document)?;
        let coll = self.collection(collection).await?;
        match coll.insert_one(&document).await {
            Ok(result) => {
                document.insert("_id", result.inserted_id);
                Ok(to_json(document))
            }
            Err(e) => self.op_failed("insertOne", collection, e),
        }
    }

    /// Insert several documents and return them with their `_id`s.
    pub async fn insert_many(&self, collection: &str, documents: &[Value]) -> Result<Vec<Value>> {
        let mut docs = documents
            .iter()
            .map(|d| to_document("document", d))
            .collect::<Result<Vec<_>>>()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let coll = self.collection(collection).await?;
        match coll.insert_many(&docs).await {
            Ok(result) => {
                for (idx, id) in result.inserted_ids {
                    if let Some(doc) = docs.get_mut(idx) {
                        doc.insert("_id", id);
                    }
                }
                Ok(docs.into_iter().map(to_json).collect())
            }
            Err(e) => self.op_failed("insertMany", collection, e),
        }
    }

    /// Apply `$set: update` to the first match. True when a document changed.
    pub async fn update_one(&self, collection: &str, filter: &Value, update: &Value) -> Result<bool> {
        let filter = to_document("filter", filter)?;
        let update = doc! { "$set": to_document("update", update)? };
        let coll = self.collection(collection).await?;
        match coll.update_one(filter, update).await {
            Ok(result) => Ok(result.modified_count > 0),
            Err(e) => self.op_failed("updateOne", collection, e),
        }
    }

    /// Apply `$set: update` to every match and return the modified count.
    pub async fn update_many(&self, collection: &str, filter: &Value, update: &Value) -> Result<u64> {
        let filter = to_document("filter", filter)?;
        let update = doc! { "$set": to_document("update", update)? };
        let coll = self.collection(collection).await?;
        match coll.update_many(filter, update).await {
            Ok(result) => Ok(result.modified_count),
            Err(e) => self.op_failed("updateMany", collection, e),
        }
    }

    pub async fn delete_one(&self, collection: &str, filter: &Value) -> Result<bool> {
        let filter = to_document("filter", filter)?;
        let coll = self.collection(collection).await?;
        match coll.delete_one(filter).await {
            Ok(result) => Ok(result.deleted_count > 0),
            Err(e) => self.op_failed("deleteOne", collection, e),
        }
    }

    pub async fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64> {
        let filter = to_document("filter", filter)?;
        let coll = self.collection(collection).await?;
        match coll.delete_many(filter).await {
            Ok(result) => Ok(result.deleted_count),
            Err(e) => self.op_failed("deleteMany", collection, e),
        }
    }

    fn op_failed<T>(&self, operation: &str, collection: &str, e: mongodb::error::Error) -> Result<T> {
        let err = AppError::mongo(format!("MongoDB {operation} failed on {collection}"))
            .with_details(json!({ "operation": operation, "collection": collection }))
            .with_source(e);
        self.fail("MongoDB operation failed", err)
    }

    fn fail<T>(&self, message: &str, err: AppError) -> Result<T> {
        Err(self.logger.report(message, err, None))
    }
}

fn to_document(what: &str, value: &Value) -> Result<Document> {
    if !value.is_object() {
        return Err(AppError::validation(format!("MongoDB {what} must be a JSON object")));
    }
    mongodb::bson::to_document(value).map_err(|e| {
        AppError::validation(format!("MongoDB {what} could not be converted to BSON"))
            .with_source(e)
    })
}

fn to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    serde_json::from_value(to_json(document)).map_err(|e| {
        AppError::mongo(format!("Failed to decode MongoDB document: {e}")).with_source(e)
    })
}
