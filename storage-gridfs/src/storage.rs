use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use tracing::{debug, info, instrument};

use storage_core::{
    BackendCause, BucketRecord, ConnectionDescriptor, FileId, FileRecord, FileRef, GenericStorage,
    HashAlgorithm, RecordStream, SizeScale, SizeUnit, StorageError, StorageResult, WriteStream,
};

use crate::client::{
    chunks_collection, files_collection, ChunkClient, CHUNKS_SUFFIX, DEFAULT_CHUNK_SIZE, FILES_SUFFIX,
};
use crate::mongo::MongoChunkClient;
use crate::stream::{ChunkReadStream, ChunkWriteStream};

/// Which half of a GridFS bucket a collection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketPart {
    Files,
    Chunks,
}

/// Split `<bucket>.files` / `<bucket>.chunks` into the bucket name and part
fn classify(collection: &str) -> Option<(&str, BucketPart)> {
    let (bucket, suffix) = collection.rsplit_once('.')?;
    let part = match suffix {
        FILES_SUFFIX => BucketPart::Files,
        CHUNKS_SUFFIX => BucketPart::Chunks,
        _ => return None,
    };
    (!bucket.is_empty()).then_some((bucket, part))
}

/// Bucket assembled while walking collections
#[derive(Debug)]
struct PendingBucket {
    record: BucketRecord,
    files_seen: bool,
    chunks_seen: bool,
}

/// GridFS chunk store: a bucket is a `<name>.files` + `<name>.chunks` collection pair
pub struct ChunkStorage<C: ChunkClient> {
    client: Arc<C>,
    chunk_size: usize,
}

impl ChunkStorage<MongoChunkClient> {
    /// Build a MongoDB-backed store; the `chunkSize` option overrides the chunk size
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> StorageResult<Self> {
        let client = MongoChunkClient::from_descriptor(descriptor)?;
        let chunk_size = descriptor
            .option_parsed::<usize>("chunkSize")?
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        if chunk_size == 0 {
            return Err(StorageError::configuration("chunkSize must be greater than zero"));
        }
        Ok(Self::new(client).with_chunk_size(chunk_size))
    }
}

impl<C: ChunkClient> ChunkStorage<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn drop_part(&self, collection: String) -> StorageResult<()> {
        self.client.drop_collection(&collection).await.map_err(|e| StorageError::Backend {
            cause: BackendCause::PartialDrop,
            message: format!("could not drop {}: {}", collection, e),
            source: Some(Box::new(e)),
        })
    }
}

#[async_trait]
impl<C: ChunkClient> GenericStorage for ChunkStorage<C> {
    fn kind(&self) -> &'static str {
        "gridfs"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.client.connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.client.disconnect().await
    }

    fn bucket_list(&self) -> RecordStream<'_, BucketRecord> {
        Box::pin(try_stream! {
            let mut pending: HashMap<String, PendingBucket> = HashMap::new();

            for collection in self.client.collection_names().await? {
                let Some((name, part)) = classify(&collection) else {
                    continue;
                };

                let entry = pending.entry(name.to_string()).or_insert_with(|| PendingBucket {
                    record: BucketRecord::new(name),
                    files_seen: false,
                    chunks_seen: false,
                });

                match part {
                    BucketPart::Chunks => {
                        entry.record.total_size += self.client.collection_size(&collection).await?;
                        entry.chunks_seen = true;
                    }
                    BucketPart::Files => {
                        entry.record.file_count = self.client.count_documents(&collection).await?;
                        if entry.record.file_count > 0 {
                            entry.record.latest_upload = self.client.latest_upload(&collection).await?;
                        }
                        entry.files_seen = true;
                    }
                }
                entry.record.raw_ids.push(collection.clone());

                if entry.files_seen && entry.chunks_seen {
                    if let Some(done) = pending.remove(name) {
                        yield done.record;
                    }
                }
            }

            if !pending.is_empty() {
                debug!("Skipped {} incomplete GridFS bucket(s)", pending.len());
            }
        })
    }

    /// A bucket exists while either of its collections does
    async fn bucket_exists(&self, name: &str) -> StorageResult<bool> {
        let files = files_collection(name);
        let chunks = chunks_collection(name);
        Ok(self
            .client
            .collection_names()
            .await?
            .iter()
            .any(|collection| *collection == files || *collection == chunks))
    }

    #[instrument(skip(self))]
    async fn drop_bucket(&self, name: &str) -> StorageResult<()> {
        if !self.bucket_exists(name).await? {
            return Err(StorageError::not_found("bucket", name));
        }

        self.drop_part(chunks_collection(name)).await?;
        self.drop_part(files_collection(name)).await?;
        info!("Dropped GridFS bucket {}", name);
        Ok(())
    }

    async fn list(&self, bucket: &str, filename: Option<&str>) -> StorageResult<Vec<FileRecord>> {
        let files = self
            .client
            .find_files(&files_collection(bucket), filename)
            .await?;

        Ok(files
            .into_iter()
            .map(|file| FileRecord {
                id: FileId::new(file.id.clone()),
                filename: file.filename.clone(),
                length: SizeScale::from_u64(file.length),
                uploaded_at: file.upload_date,
                integrity_hash: file.md5.clone(),
                hash_algorithm: HashAlgorithm::Md5,
                stream: Box::new(ChunkReadStream::new(self.client.clone(), bucket, &file)),
            })
            .collect())
    }

    async fn new_write_stream(
        &self,
        bucket: &str,
        filename: &str,
        _expected_size: u64,
    ) -> StorageResult<Box<dyn WriteStream>> {
        self.client
            .ensure_indexes(&files_collection(bucket), &chunks_collection(bucket))
            .await?;

        let files_id = ObjectId::new().to_hex();
        debug!("Opening GridFS upload {} for {}/{}", files_id, bucket, filename);

        Ok(Box::new(ChunkWriteStream::new(
            self.client.clone(),
            bucket,
            filename,
            files_id,
            self.chunk_size,
        )))
    }

    async fn delete(&self, bucket: &str, file: FileRef<'_>) -> StorageResult<()> {
        let id = file.id().as_str();
        self.client.delete_file(&files_collection(bucket), id).await?;
        self.client.delete_chunks(&chunks_collection(bucket), id).await?;
        debug!("Deleted {} from {}", id, bucket);
        Ok(())
    }

    async fn server_stats(&self, unit: Option<SizeUnit>) -> StorageResult<BTreeMap<String, String>> {
        let info = self.client.server_info().await?;

        let mut stats = BTreeMap::new();
        stats.insert("server version".to_string(), info.version);
        stats.insert("db".to_string(), info.database);
        stats.insert(
            "storage size".to_string(),
            SizeScale::new(info.storage_size).render(unit),
        );
        stats.insert("data size".to_string(), SizeScale::new(info.data_size).render(unit));
        stats.insert("collections".to_string(), info.collections.to_string());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gridfs_collections() {
        assert_eq!(classify("media.files"), Some(("media", BucketPart::Files)));
        assert_eq!(classify("a.b.chunks"), Some(("a.b", BucketPart::Chunks)));
        assert_eq!(classify("users"), None);
        assert_eq!(classify("media.meta"), None);
        assert_eq!(classify(".files"), None);
    }
}
