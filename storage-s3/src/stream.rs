use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};

use storage_core::{
    BackendCause, ContentHasher, FileId, FrameBuffer, HashAlgorithm, ReadStream, StorageError,
    StorageResult, StreamState, WriteReceipt, WriteStream,
};

use crate::client::{BodyStream, ObjectClient, UploadedPart, MAX_COPY_SIZE, SHA256_METADATA};

/// How bytes reach the server
enum UploadMode {
    /// Buffered in memory and sent with one `PutObject` on close
    Single { buffer: FrameBuffer },
    /// One `UploadPart` per part-sized piece
    Multipart {
        upload_id: String,
        parts: Vec<UploadedPart>,
        pending: FrameBuffer,
    },
}

/// Uploads an object with a single PUT or a multipart upload, stamping its sha256
pub struct ObjectWriteStream<C: ObjectClient> {
    client: Arc<C>,
    bucket: String,
    key: String,
    part_size: usize,
    hasher: ContentHasher,
    written: u64,
    mode: UploadMode,
}

impl<C: ObjectClient> ObjectWriteStream<C> {
    pub(crate) fn single(client: Arc<C>, bucket: &str, key: &str, part_size: usize) -> Self {
        Self::with_mode(
            client,
            bucket,
            key,
            part_size,
            UploadMode::Single {
                buffer: FrameBuffer::new(),
            },
        )
    }

    pub(crate) fn multipart(
        client: Arc<C>,
        bucket: &str,
        key: &str,
        part_size: usize,
        upload_id: String,
    ) -> Self {
        Self::with_mode(
            client,
            bucket,
            key,
            part_size,
            UploadMode::Multipart {
                upload_id,
                parts: Vec::new(),
                pending: FrameBuffer::with_capacity(part_size),
            },
        )
    }

    fn with_mode(client: Arc<C>, bucket: &str, key: &str, part_size: usize, mode: UploadMode) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            part_size,
            hasher: HashAlgorithm::Sha256.hasher(),
            written: 0,
            mode,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.mode, UploadMode::Multipart { .. })
    }

    async fn send_part(
        &self,
        upload_id: &str,
        parts: &mut Vec<UploadedPart>,
        data: Bytes,
    ) -> StorageResult<()> {
        let part_number = parts.len() as i32 + 1;
        let size = data.len();
        let etag = self
            .client
            .upload_part(&self.bucket, &self.key, upload_id, part_number, data)
            .await?;

        debug!("Uploaded part {} ({} bytes) of {}", part_number, size, self.key);
        parts.push(UploadedPart { part_number, etag });
        Ok(())
    }

    async fn complete(
        &self,
        upload_id: &str,
        mut parts: Vec<UploadedPart>,
        mut pending: FrameBuffer,
    ) -> StorageResult<()> {
        // A multipart upload needs at least one part, even an empty one
        if !pending.is_empty() || parts.is_empty() {
            self.send_part(upload_id, &mut parts, pending.take_all()).await?;
        }

        self.client
            .complete_multipart_upload(&self.bucket, &self.key, upload_id, parts)
            .await
    }

    async fn abort_upload(&self, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload(&self.bucket, &self.key, upload_id)
            .await
        {
            warn!("Failed to abort multipart upload of {}: {}", self.key, e);
        }
    }

    /// Stamp the sha256 on a completed multipart object and check what was stored
    async fn seal(&self, stamp: Option<HashMap<String, String>>, sha256: String) -> StorageResult<WriteReceipt> {
        if let Some(metadata) = stamp {
            if self.written <= MAX_COPY_SIZE {
                self.client
                    .replace_metadata(&self.bucket, &self.key, metadata)
                    .await?;
            } else {
                warn!(
                    "{} is larger than a single copy allows, sha256 not stored",
                    self.key
                );
            }
        }

        let head = self.client.head_object(&self.bucket, &self.key).await?;
        if head.size != self.written {
            return Err(StorageError::backend_message(
                BackendCause::Protocol,
                format!(
                    "{} stored {} bytes but {} were written",
                    self.key, head.size, self.written
                ),
            ));
        }

        let hash = match head.metadata.get(SHA256_METADATA) {
            Some(stored) => stored.clone(),
            None => sha256,
        };
        Ok(WriteReceipt {
            file_id: FileId::new(self.key.clone()),
            hash,
            size_bytes: self.written,
        })
    }

    async fn discard_object(&self) {
        if let Err(e) = self.client.delete_object(&self.bucket, &self.key).await {
            warn!("Failed to remove unverified object {}: {}", self.key, e);
        }
    }
}

#[async_trait]
impl<C: ObjectClient> WriteStream for ObjectWriteStream<C> {
    fn chunk_size(&self) -> usize {
        self.part_size
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn written(&self) -> u64 {
        self.written
    }

    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.hasher.update(&chunk);
        self.written += chunk.len() as u64;

        let mode = std::mem::replace(
            &mut self.mode,
            UploadMode::Single {
                buffer: FrameBuffer::new(),
            },
        );
        let (mode, result) = match mode {
            UploadMode::Single { mut buffer } => {
                buffer.push(&chunk);
                (UploadMode::Single { buffer }, Ok(()))
            }
            UploadMode::Multipart {
                upload_id,
                mut parts,
                mut pending,
            } => {
                pending.push(&chunk);
                let mut result = Ok(());
                while let Some(part) = pending.take(self.part_size) {
                    result = self.send_part(&upload_id, &mut parts, part).await;
                    if result.is_err() {
                        break;
                    }
                }
                (
                    UploadMode::Multipart {
                        upload_id,
                        parts,
                        pending,
                    },
                    result,
                )
            }
        };
        self.mode = mode;
        result
    }

    async fn close(mut self: Box<Self>) -> StorageResult<WriteReceipt> {
        let hasher = std::mem::replace(&mut self.hasher, HashAlgorithm::Sha256.hasher());
        let sha256 = hasher.finalize();
        let metadata = HashMap::from([(SHA256_METADATA.to_string(), sha256.clone())]);

        let mode = std::mem::replace(
            &mut self.mode,
            UploadMode::Single {
                buffer: FrameBuffer::new(),
            },
        );
        let stamp = match mode {
            UploadMode::Single { mut buffer } => {
                self.client
                    .put_object(&self.bucket, &self.key, buffer.take_all(), metadata)
                    .await?;
                None
            }
            UploadMode::Multipart {
                upload_id,
                parts,
                pending,
            } => {
                if let Err(err) = self.complete(&upload_id, parts, pending).await {
                    self.abort_upload(&upload_id).await;
                    return Err(err);
                }
                Some(metadata)
            }
        };

        // The object exists from here on; a failed check must not leave it behind
        match self.seal(stamp, sha256).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                self.discard_object().await;
                Err(err)
            }
        }
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        if let UploadMode::Multipart { upload_id, .. } = &self.mode {
            self.abort_upload(upload_id).await;
        }
        Ok(())
    }
}

/// Open `GetObject` body with frames not yet handed out
pub struct ObjectCursor {
    body: BodyStream,
    buffer: FrameBuffer,
    refined_hash: Option<String>,
}

/// Streams an object; the `GetObject` request is deferred until the first read
pub struct ObjectReadStream<C: ObjectClient> {
    client: Arc<C>,
    bucket: String,
    key: String,
    length: u64,
    chunk_size: usize,
    hash: Option<String>,
    position: u64,
    state: StreamState<ObjectCursor>,
}

impl<C: ObjectClient> ObjectReadStream<C> {
    pub(crate) fn new(
        client: Arc<C>,
        bucket: &str,
        key: &str,
        length: u64,
        chunk_size: usize,
        hash: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            length,
            chunk_size,
            hash,
            position: 0,
            state: StreamState::Unopened,
        }
    }
}

#[async_trait]
impl<C: ObjectClient> ReadStream for ObjectReadStream<C> {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn len(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn hash_value(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    async fn read_chunk(&mut self, len: usize) -> StorageResult<Bytes> {
        if self.position + len as u64 > self.length {
            return Err(StorageError::unsupported(format!(
                "read of {} bytes at {} past the end of {}",
                len, self.position, self.key
            )));
        }

        let client = &self.client;
        let bucket = &self.bucket;
        let key = &self.key;
        let cursor = self
            .state
            .get_or_open(|| async move {
                let object = client.get_object(bucket, key).await?;
                Ok(ObjectCursor {
                    refined_hash: object.metadata.get(SHA256_METADATA).cloned(),
                    body: object.body,
                    buffer: FrameBuffer::new(),
                })
            })
            .await?;

        if let Some(hash) = cursor.refined_hash.take() {
            self.hash = Some(hash);
        }

        while cursor.buffer.len() < len {
            match cursor.body.next().await {
                Some(frame) => cursor.buffer.push(&frame?),
                None => {
                    return Err(StorageError::backend_message(
                        BackendCause::Protocol,
                        format!("{} ended after {} bytes", self.key, self.position + cursor.buffer.len() as u64),
                    ))
                }
            }
        }

        let data = cursor.buffer.take(len).unwrap_or_default();
        self.position += data.len() as u64;
        Ok(data)
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.state.close();
        Ok(())
    }
}
