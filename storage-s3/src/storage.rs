use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use storage_core::{
    BackendCause, BucketRecord, ConnectionDescriptor, FileId, FileRecord, FileRef, GenericStorage,
    HashAlgorithm, RecordStream, SizeScale, SizeUnit, StorageError, StorageResult, WriteStream,
};

use crate::aws::{AwsObjectClient, S3Config};
use crate::client::{ObjectClient, MIN_PART_SIZE, SHA256_METADATA};
use crate::stream::{ObjectReadStream, ObjectWriteStream};

/// Chunk size reported by read streams
pub const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// S3 / MinIO object store: buckets are S3 buckets, files are objects keyed by filename
pub struct ObjectStorage<C: ObjectClient> {
    client: Arc<C>,
    part_size: usize,
}

impl ObjectStorage<AwsObjectClient> {
    /// Build an AWS SDK backed store; `partSize` may raise the part size above 5 MiB
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> StorageResult<Self> {
        let part_size = descriptor
            .option_parsed::<usize>("partSize")?
            .unwrap_or(MIN_PART_SIZE)
            .max(MIN_PART_SIZE);

        let client = AwsObjectClient::new(S3Config::from_descriptor(descriptor));
        Ok(Self::new(client).with_part_size(part_size))
    }
}

impl<C: ObjectClient> ObjectStorage<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            part_size: MIN_PART_SIZE,
        }
    }

    /// Uploads smaller than this go out as one PUT; larger ones use parts of this size
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: ObjectClient> GenericStorage for ObjectStorage<C> {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.client.connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.client.disconnect().await
    }

    fn bucket_list(&self) -> RecordStream<'_, BucketRecord> {
        Box::pin(try_stream! {
            for bucket in self.client.list_buckets().await? {
                let objects = self.client.list_objects(&bucket.name, None).await?;

                let mut record = BucketRecord::new(bucket.name.clone());
                record.file_count = objects.len() as u64;
                for object in &objects {
                    record.total_size += SizeScale::from_u64(object.size);
                }
                record.latest_upload = bucket.created;
                record.raw_ids.push(bucket.name);

                yield record;
            }
        })
    }

    async fn bucket_exists(&self, name: &str) -> StorageResult<bool> {
        self.client.bucket_exists(name).await
    }

    #[instrument(skip(self))]
    async fn drop_bucket(&self, name: &str) -> StorageResult<()> {
        if !self.client.bucket_exists(name).await? {
            return Err(StorageError::not_found("bucket", name));
        }

        for object in self.client.list_objects(name, None).await? {
            self.client
                .delete_object(name, &object.key)
                .await
                .map_err(|e| partial_drop(format!("object {}/{}", name, object.key), e))?;
        }
        self.client
            .delete_bucket(name)
            .await
            .map_err(|e| partial_drop(format!("bucket {}", name), e))?;

        info!("Dropped bucket {}", name);
        Ok(())
    }

    async fn list(&self, bucket: &str, filename: Option<&str>) -> StorageResult<Vec<FileRecord>> {
        let objects = self.client.list_objects(bucket, filename).await?;
        let mut records = Vec::with_capacity(objects.len());

        for object in objects {
            // Keys ending in a slash are directory markers
            if object.key.ends_with('/') {
                continue;
            }

            let head = self.client.head_object(bucket, &object.key).await?;
            let hash = head.metadata.get(SHA256_METADATA).cloned();
            let uploaded_at = head
                .last_modified
                .or(object.last_modified)
                .unwrap_or_default();

            records.push(FileRecord {
                id: FileId::new(object.key.clone()),
                filename: object.key.clone(),
                length: SizeScale::from_u64(object.size),
                uploaded_at,
                integrity_hash: hash.clone(),
                hash_algorithm: HashAlgorithm::Sha256,
                stream: Box::new(ObjectReadStream::new(
                    self.client.clone(),
                    bucket,
                    &object.key,
                    object.size,
                    READ_CHUNK_SIZE,
                    hash,
                )),
            });
        }
        Ok(records)
    }

    async fn new_write_stream(
        &self,
        bucket: &str,
        filename: &str,
        expected_size: u64,
    ) -> StorageResult<Box<dyn WriteStream>> {
        if !self.client.bucket_exists(bucket).await? {
            self.client.create_bucket(bucket).await?;
        }

        if expected_size < self.part_size as u64 {
            debug!("Single PUT for {}/{} ({} bytes)", bucket, filename, expected_size);
            return Ok(Box::new(ObjectWriteStream::single(
                self.client.clone(),
                bucket,
                filename,
                self.part_size,
            )));
        }

        let upload_id = self.client.create_multipart_upload(bucket, filename).await?;
        debug!("Multipart upload {} for {}/{}", upload_id, bucket, filename);
        Ok(Box::new(ObjectWriteStream::multipart(
            self.client.clone(),
            bucket,
            filename,
            self.part_size,
            upload_id,
        )))
    }

    async fn delete(&self, bucket: &str, file: FileRef<'_>) -> StorageResult<()> {
        self.client.delete_object(bucket, file.id().as_str()).await
    }

    /// Capacity and disk health need the MinIO admin API, so S3 only reports
    /// reachability, the server software and usage summed over the listings.
    async fn server_stats(&self, unit: Option<SizeUnit>) -> StorageResult<BTreeMap<String, String>> {
        let started = Instant::now();
        let software = self.client.server_software().await?;
        let latency = started.elapsed();

        let buckets = self.client.list_buckets().await?;

        let mut objects = 0u64;
        let mut used = SizeScale::default();
        for bucket in &buckets {
            for object in self.client.list_objects(&bucket.name, None).await? {
                objects += 1;
                used += SizeScale::from_u64(object.size);
            }
        }

        let mut stats = BTreeMap::new();
        stats.insert("endpoint".to_string(), self.client.endpoint());
        stats.insert("region".to_string(), self.client.region());
        stats.insert("buckets".to_string(), buckets.len().to_string());
        stats.insert("objects".to_string(), objects.to_string());
        stats.insert("used".to_string(), used.render(unit));
        stats.insert(
            "server".to_string(),
            software.unwrap_or_else(|| "unknown".to_string()),
        );
        stats.insert("health".to_string(), "online".to_string());
        stats.insert("latency".to_string(), format!("{} ms", latency.as_millis()));
        stats.insert("capacity".to_string(), "not reported over S3".to_string());
        Ok(stats)
    }
}

fn partial_drop(target: String, err: StorageError) -> StorageError {
    StorageError::Backend {
        cause: BackendCause::PartialDrop,
        message: format!("could not remove {}: {}", target, err),
        source: Some(Box::new(err)),
    }
}
