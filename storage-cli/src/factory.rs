use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use storage_core::{
    BucketRecord, ConnectionDescriptor, FileRecord, FileRef, GenericStorage, RecordStream, SizeUnit,
    StorageError, StorageResult, WriteStream,
};
use storage_gridfs::{ChunkStorage, MongoChunkClient};
use storage_s3::{AwsObjectClient, ObjectStorage};

/// The backend selected by the connection string scheme
pub enum Backend {
    /// `mongodb://`
    Chunk(ChunkStorage<MongoChunkClient>),
    /// `s3://` and `minio://`
    Object(ObjectStorage<AwsObjectClient>),
}

impl Backend {
    /// Pick and build the backend; nothing touches the network until `connect`
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> StorageResult<Self> {
        debug!("Using {}", descriptor);
        match descriptor.scheme() {
            "mongodb" => Ok(Backend::Chunk(ChunkStorage::from_descriptor(descriptor)?)),
            "s3" | "minio" => Ok(Backend::Object(ObjectStorage::from_descriptor(descriptor)?)),
            other => Err(StorageError::UnsupportedBackend {
                scheme: other.to_string(),
            }),
        }
    }

    pub fn from_url(url: &str) -> StorageResult<Self> {
        Self::from_descriptor(&ConnectionDescriptor::parse(url)?)
    }

    fn inner(&self) -> &dyn GenericStorage {
        match self {
            Backend::Chunk(storage) => storage,
            Backend::Object(storage) => storage,
        }
    }
}

#[async_trait]
impl GenericStorage for Backend {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    async fn connect(&self) -> StorageResult<()> {
        self.inner().connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.inner().disconnect().await
    }

    fn bucket_list(&self) -> RecordStream<'_, BucketRecord> {
        self.inner().bucket_list()
    }

    async fn bucket_exists(&self, name: &str) -> StorageResult<bool> {
        self.inner().bucket_exists(name).await
    }

    async fn drop_bucket(&self, name: &str) -> StorageResult<()> {
        self.inner().drop_bucket(name).await
    }

    async fn list(&self, bucket: &str, filename: Option<&str>) -> StorageResult<Vec<FileRecord>> {
        self.inner().list(bucket, filename).await
    }

    async fn new_write_stream(
        &self,
        bucket: &str,
        filename: &str,
        expected_size: u64,
    ) -> StorageResult<Box<dyn WriteStream>> {
        self.inner().new_write_stream(bucket, filename, expected_size).await
    }

    async fn delete(&self, bucket: &str, file: FileRef<'_>) -> StorageResult<()> {
        self.inner().delete(bucket, file).await
    }

    async fn server_stats(&self, unit: Option<SizeUnit>) -> StorageResult<BTreeMap<String, String>> {
        self.inner().server_stats(unit).await
    }
}
