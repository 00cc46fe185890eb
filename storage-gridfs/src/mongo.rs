use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, oid::ObjectId, Binary, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use storage_core::{BackendCause, ConnectionDescriptor, StorageError, StorageResult};

use crate::client::{ChunkClient, ChunkDocument, FileDocument, ServerInfo, DEFAULT_CHUNK_SIZE};

/// Connection options consumed by the adapter rather than the driver
const ADAPTER_OPTIONS: &[&str] = &["chunkSize"];

#[derive(Clone)]
struct Session {
    client: Client,
    db: Database,
}

/// [`ChunkClient`] over the official MongoDB driver
pub struct MongoChunkClient {
    uri: String,
    database: String,
    session: RwLock<Option<Session>>,
    /// Collections whose GridFS indexes are known to exist
    indexed: Mutex<HashSet<String>>,
}

impl MongoChunkClient {
    pub fn new<U: Into<String>, D: Into<String>>(uri: U, database: D) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            session: RwLock::new(None),
            indexed: Mutex::new(HashSet::new()),
        }
    }

    /// The database comes from the path of the connection string
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> StorageResult<Self> {
        let database = descriptor.bucket();
        if database.is_empty() {
            return Err(StorageError::configuration(
                "MongoDB connection string must name a database: mongodb://host[:port]/<database>",
            ));
        }

        Ok(Self::new(driver_uri(descriptor), database))
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn db(&self) -> StorageResult<Database> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.db.clone())
            .ok_or_else(StorageError::not_connected)
    }

    fn collection(&self, name: &str) -> StorageResult<Collection<Document>> {
        Ok(self.db()?.collection::<Document>(name))
    }

    fn map_mongo_error(err: mongodb::error::Error) -> StorageError {
        let cause = match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => BackendCause::Authentication,
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => BackendCause::Connection,
            ErrorKind::InvalidArgument { .. } => return StorageError::configuration(err.to_string()),
            _ => BackendCause::Server,
        };
        StorageError::backend_with(cause, err)
    }
}

#[async_trait]
impl ChunkClient for MongoChunkClient {
    async fn connect(&self) -> StorageResult<()> {
        if self.session.read().is_some() {
            return Ok(());
        }

        let client = Client::with_uri_str(&self.uri)
            .await
            .map_err(Self::map_mongo_error)?;
        let db = client.database(&self.database);

        // The driver connects lazily; ping so bad hosts and credentials fail here
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(Self::map_mongo_error)?;

        info!("Connected to MongoDB database {}", self.database);
        *self.session.write() = Some(Session { client, db });
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.client.shutdown().await;
            debug!("Disconnected from MongoDB");
        }
        Ok(())
    }

    async fn collection_names(&self) -> StorageResult<Vec<String>> {
        self.db()?
            .list_collection_names()
            .await
            .map_err(Self::map_mongo_error)
    }

    async fn collection_size(&self, collection: &str) -> StorageResult<i64> {
        let stats = self
            .db()?
            .run_command(doc! { "collStats": collection })
            .await
            .map_err(Self::map_mongo_error)?;
        Ok(stats.get("size").and_then(bson_number).unwrap_or(0))
    }

    async fn count_documents(&self, collection: &str) -> StorageResult<u64> {
        self.collection(collection)?
            .count_documents(doc! {})
            .await
            .map_err(Self::map_mongo_error)
    }

    async fn latest_upload(&self, files: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let latest = self
            .collection(files)?
            .find_one(doc! {})
            .sort(doc! { "uploadDate": -1 })
            .await
            .map_err(Self::map_mongo_error)?;

        Ok(latest.as_ref().and_then(upload_date))
    }

    async fn drop_collection(&self, collection: &str) -> StorageResult<()> {
        self.indexed.lock().remove(collection);
        self.collection(collection)?
            .drop()
            .await
            .map_err(Self::map_mongo_error)
    }

    async fn ensure_indexes(&self, files: &str, chunks: &str) -> StorageResult<()> {
        {
            let indexed = self.indexed.lock();
            if indexed.contains(files) && indexed.contains(chunks) {
                return Ok(());
            }
        }

        let chunk_index = IndexModel::builder()
            .keys(doc! { "files_id": 1, "n": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection(chunks)?
            .create_index(chunk_index)
            .await
            .map_err(Self::map_mongo_error)?;

        let file_index = IndexModel::builder()
            .keys(doc! { "filename": 1, "uploadDate": 1 })
            .build();
        self.collection(files)?
            .create_index(file_index)
            .await
            .map_err(Self::map_mongo_error)?;

        debug!("GridFS indexes in place on {} and {}", files, chunks);
        let mut indexed = self.indexed.lock();
        indexed.insert(files.to_string());
        indexed.insert(chunks.to_string());
        Ok(())
    }

    async fn find_files(&self, files: &str, filename: Option<&str>) -> StorageResult<Vec<FileDocument>> {
        let filter = match filename {
            Some(name) => doc! { "filename": { "$regex": escape_regex(name) } },
            None => doc! {},
        };

        let documents: Vec<Document> = self
            .collection(files)?
            .find(filter)
            .sort(doc! { "uploadDate": 1 })
            .await
            .map_err(Self::map_mongo_error)?
            .try_collect()
            .await
            .map_err(Self::map_mongo_error)?;

        documents.iter().map(file_from_document).collect()
    }

    async fn insert_file(&self, files: &str, file: FileDocument) -> StorageResult<()> {
        let mut document = doc! {
            "_id": id_bson(&file.id),
            "length": file.length as i64,
            "chunkSize": file.chunk_size as i32,
            "uploadDate": mongodb::bson::DateTime::from_millis(file.upload_date.timestamp_millis()),
            "filename": file.filename,
        };
        if let Some(md5) = file.md5 {
            document.insert("md5", md5);
        }

        self.collection(files)?
            .insert_one(document)
            .await
            .map_err(Self::map_mongo_error)?;
        Ok(())
    }

    async fn delete_file(&self, files: &str, id: &str) -> StorageResult<()> {
        self.collection(files)?
            .delete_one(doc! { "_id": id_bson(id) })
            .await
            .map_err(Self::map_mongo_error)?;
        Ok(())
    }

    async fn insert_chunk(&self, chunks: &str, chunk: ChunkDocument) -> StorageResult<()> {
        let document = doc! {
            "_id": ObjectId::new(),
            "files_id": id_bson(&chunk.files_id),
            "n": chunk.n as i32,
            "data": Binary { subtype: BinarySubtype::Generic, bytes: chunk.data.to_vec() },
        };

        self.collection(chunks)?
            .insert_one(document)
            .await
            .map_err(Self::map_mongo_error)?;
        Ok(())
    }

    async fn find_chunk(&self, chunks: &str, files_id: &str, n: u32) -> StorageResult<Option<ChunkDocument>> {
        let found = self
            .collection(chunks)?
            .find_one(doc! { "files_id": id_bson(files_id), "n": n as i32 })
            .await
            .map_err(Self::map_mongo_error)?;

        let Some(document) = found else {
            return Ok(None);
        };
        let data = document.get_binary_generic("data").map_err(|e| {
            StorageError::backend_message(
                BackendCause::Protocol,
                format!("chunk {} of {} has no binary data: {}", n, files_id, e),
            )
        })?;

        Ok(Some(ChunkDocument {
            files_id: files_id.to_string(),
            n,
            data: Bytes::copy_from_slice(data),
        }))
    }

    async fn delete_chunks(&self, chunks: &str, files_id: &str) -> StorageResult<u64> {
        let result = self
            .collection(chunks)?
            .delete_many(doc! { "files_id": id_bson(files_id) })
            .await
            .map_err(Self::map_mongo_error)?;
        Ok(result.deleted_count)
    }

    async fn file_md5(&self, bucket: &str, files_id: &str) -> StorageResult<String> {
        let reply = self
            .db()?
            .run_command(doc! { "filemd5": id_bson(files_id), "root": bucket })
            .await
            .map_err(Self::map_mongo_error)?;

        reply.get_str("md5").map(str::to_string).map_err(|e| {
            StorageError::backend_message(
                BackendCause::Protocol,
                format!("filemd5 reply for {} has no md5: {}", files_id, e),
            )
        })
    }

    async fn server_info(&self) -> StorageResult<ServerInfo> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(StorageError::not_connected)?;

        let build = session
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(Self::map_mongo_error)?;
        let stats = session
            .db
            .run_command(doc! { "dbStats": 1 })
            .await
            .map_err(Self::map_mongo_error)?;

        Ok(ServerInfo {
            version: build.get_str("version").unwrap_or("<unknown>").to_string(),
            database: stats.get_str("db").unwrap_or("<unknown>").to_string(),
            storage_size: stats.get("storageSize").and_then(bson_number).unwrap_or(-1),
            data_size: stats.get("dataSize").and_then(bson_number).unwrap_or(-1),
            collections: stats.get("collections").and_then(bson_number).unwrap_or(-1),
        })
    }
}

/// Rebuild the connection string for the driver, leaving out adapter options
fn driver_uri(descriptor: &ConnectionDescriptor) -> String {
    let mut uri = format!("{}://", descriptor.scheme());
    if let Some(creds) = descriptor.credentials() {
        uri.push_str(&format!(
            "{}:{}@",
            urlencoding::encode(&creds.user),
            urlencoding::encode(&creds.password)
        ));
    }
    uri.push_str(&descriptor.endpoint());
    uri.push('/');
    uri.push_str(descriptor.bucket());

    let query: Vec<String> = descriptor
        .options()
        .iter()
        .filter(|(key, _)| !ADAPTER_OPTIONS.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query.join("&"));
    }
    uri
}

/// Escape regex metacharacters so the filter is a plain substring match
fn escape_regex(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn bson_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn id_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_bson(id: &str) -> Bson {
    ObjectId::parse_str(id)
        .map(Bson::ObjectId)
        .unwrap_or_else(|_| Bson::String(id.to_string()))
}

fn upload_date(document: &Document) -> Option<DateTime<Utc>> {
    let date = document.get_datetime("uploadDate").ok()?;
    DateTime::<Utc>::from_timestamp_millis(date.timestamp_millis())
}

fn file_from_document(document: &Document) -> StorageResult<FileDocument> {
    let id = document.get("_id").map(id_string).ok_or_else(|| {
        StorageError::backend_message(BackendCause::Protocol, "files document without _id")
    })?;

    Ok(FileDocument {
        id,
        filename: document.get_str("filename").unwrap_or_default().to_string(),
        length: document
            .get("length")
            .and_then(bson_number)
            .unwrap_or(0)
            .max(0) as u64,
        chunk_size: document
            .get("chunkSize")
            .and_then(bson_number)
            .unwrap_or(DEFAULT_CHUNK_SIZE as i64) as u32,
        upload_date: upload_date(document).unwrap_or_default(),
        md5: document.get_str("md5").ok().map(str::to_string),
    })
}
