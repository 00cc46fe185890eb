use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    BackendCause, BucketRecord, FileRecord, FileRef, HashAlgorithm, RecordStream, SizeUnit,
    StorageError, StorageResult, WriteReceipt,
};

/// Bucket and file operations every storage backend implements
#[async_trait]
pub trait GenericStorage: Send + Sync {
    /// Short backend name used in logs
    fn kind(&self) -> &'static str;

    /// Establish the session; calling it again is a no-op
    async fn connect(&self) -> StorageResult<()>;

    /// Release the session; safe to call more than once
    async fn disconnect(&self) -> StorageResult<()>;

    /// One record per logical bucket, produced as the backend is walked
    fn bucket_list(&self) -> RecordStream<'_, BucketRecord>;

    async fn bucket_exists(&self, name: &str) -> StorageResult<bool>;

    /// Remove every backend structure of a bucket
    async fn drop_bucket(&self, name: &str) -> StorageResult<()>;

    /// Files of a bucket, optionally narrowed by a backend-defined filename match
    async fn list(&self, bucket: &str, filename: Option<&str>) -> StorageResult<Vec<FileRecord>>;

    /// Open a write stream; `expected_size` lets the backend pick its transfer strategy
    async fn new_write_stream(
        &self,
        bucket: &str,
        filename: &str,
        expected_size: u64,
    ) -> StorageResult<Box<dyn WriteStream>>;

    async fn delete(&self, bucket: &str, file: FileRef<'_>) -> StorageResult<()>;

    /// Server diagnostics rendered as display strings; sizes are auto-scaled when `unit` is `None`
    async fn server_stats(&self, unit: Option<SizeUnit>) -> StorageResult<BTreeMap<String, String>>;
}

/// Sequential read-only view over a stored object
#[async_trait]
pub trait ReadStream: Send + Sync {
    fn chunk_size(&self) -> usize;

    /// Total length of the object in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes handed out so far
    fn position(&self) -> u64;

    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Stored hash; backends may refine it once the object is opened
    fn hash_value(&self) -> Option<&str>;

    fn is_closed(&self) -> bool;

    /// Read exactly `len` bytes, failing if the object ends first
    async fn read_chunk(&mut self, len: usize) -> StorageResult<Bytes>;

    async fn close(&mut self) -> StorageResult<()>;
}

/// Sequential write-only, single-use view over an object being stored
#[async_trait]
pub trait WriteStream: Send {
    fn chunk_size(&self) -> usize;

    /// Algorithm the receipt hash is computed with
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Bytes accepted so far
    fn written(&self) -> u64;

    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Finalize the object server-side
    async fn close(self: Box<Self>) -> StorageResult<WriteReceipt>;

    /// Discard whatever was stored so far
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Lifecycle of a read stream whose backend handle is created on first use
#[derive(Debug, Default)]
pub enum StreamState<H> {
    #[default]
    Unopened,
    Open(H),
    Closed,
}

impl<H> StreamState<H> {
    pub fn is_open(&self) -> bool {
        matches!(self, StreamState::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// Return the open handle, establishing it with `open` while still unopened
    pub async fn get_or_open<F, Fut>(&mut self, open: F) -> StorageResult<&mut H>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<H>>,
    {
        if let StreamState::Unopened = self {
            let handle = open().await?;
            *self = StreamState::Open(handle);
        }

        match self {
            StreamState::Open(handle) => Ok(handle),
            StreamState::Closed => Err(StorageError::unsupported("read from a closed stream")),
            StreamState::Unopened => Err(StorageError::backend_message(
                BackendCause::Protocol,
                "stream could not be opened",
            )),
        }
    }

    /// Move to `Closed`, handing back the handle if one was open
    pub fn close(&mut self) -> Option<H> {
        match std::mem::replace(self, StreamState::Closed) {
            StreamState::Open(handle) => Some(handle),
            _ => None,
        }
    }
}
