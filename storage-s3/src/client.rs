use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use storage_core::StorageResult;

/// Smallest part S3 accepts for every part but the last (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest object a single CopyObject may target (5 GiB)
pub const MAX_COPY_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// User metadata key holding the full-object sha256
pub const SHA256_METADATA: &str = "sha256";

/// Body of a `GetObject` response, frame by frame
pub type BodyStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send + Sync>>;

#[derive(Debug, Clone, PartialEq)]
pub struct BucketInfo {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

pub struct ObjectBody {
    pub metadata: HashMap<String, String>,
    pub body: BodyStream,
}

/// Part accepted by the server during a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Base64 md5 of a payload, as sent in `Content-MD5`
pub fn content_md5(data: &[u8]) -> String {
    let sum = md5::compute(data);
    B64.encode(sum.0)
}

/// S3 operations the object store needs
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    /// Build the session and verify the credentials with an authenticated call
    async fn connect(&self) -> StorageResult<()>;

    async fn disconnect(&self) -> StorageResult<()>;

    fn endpoint(&self) -> String;

    fn region(&self) -> String;

    /// `Server` header of an authenticated round trip, e.g. `MinIO` or `AmazonS3`
    async fn server_software(&self) -> StorageResult<Option<String>>;

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Every object of a bucket, optionally restricted to a key prefix
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<ObjectInfo>>;

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Start a multipart upload, returning its id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> StorageResult<String>;

    /// Upload one part, returning the ETag the server assigned
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Replace the user metadata of an object by copying it onto itself
    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;
}
