use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use storage_core::{
    FileId, FrameBuffer, HashAlgorithm, ReadStream, StorageError, StorageResult, StreamState,
    WriteReceipt, WriteStream,
};

use crate::client::{chunks_collection, files_collection, ChunkClient, ChunkDocument, FileDocument};

/// Cuts incoming bytes into chunk documents and finalizes the files document on close
pub struct ChunkWriteStream<C: ChunkClient> {
    client: Arc<C>,
    bucket: String,
    filename: String,
    files_id: String,
    chunk_size: usize,
    buffer: FrameBuffer,
    next_n: u32,
    written: u64,
}

impl<C: ChunkClient> ChunkWriteStream<C> {
    pub(crate) fn new(client: Arc<C>, bucket: &str, filename: &str, files_id: String, chunk_size: usize) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            filename: filename.to_string(),
            files_id,
            chunk_size,
            buffer: FrameBuffer::with_capacity(chunk_size),
            next_n: 0,
            written: 0,
        }
    }

    async fn insert_chunk(&mut self, data: Bytes) -> StorageResult<()> {
        let chunk = ChunkDocument {
            files_id: self.files_id.clone(),
            n: self.next_n,
            data,
        };
        self.client.insert_chunk(&chunks_collection(&self.bucket), chunk).await?;
        self.next_n += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> StorageResult<WriteReceipt> {
        if !self.buffer.is_empty() {
            let tail = self.buffer.take_all();
            self.insert_chunk(tail).await?;
        }

        let md5 = self.client.file_md5(&self.bucket, &self.files_id).await?;
        let file = FileDocument {
            id: self.files_id.clone(),
            filename: self.filename.clone(),
            length: self.written,
            chunk_size: self.chunk_size as u32,
            upload_date: Utc::now(),
            md5: Some(md5.clone()),
        };
        self.client.insert_file(&files_collection(&self.bucket), file).await?;

        debug!(
            "Stored {} as {} chunk(s) under {}",
            self.filename, self.next_n, self.files_id
        );
        Ok(WriteReceipt {
            file_id: FileId::new(self.files_id.clone()),
            hash: md5,
            size_bytes: self.written,
        })
    }

    async fn discard_chunks(&self) -> StorageResult<()> {
        let removed = self
            .client
            .delete_chunks(&chunks_collection(&self.bucket), &self.files_id)
            .await?;
        debug!("Discarded {} chunk(s) of {}", removed, self.filename);
        Ok(())
    }
}

#[async_trait]
impl<C: ChunkClient> WriteStream for ChunkWriteStream<C> {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Md5
    }

    fn written(&self) -> u64 {
        self.written
    }

    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.written += chunk.len() as u64;
        self.buffer.push(&chunk);

        while let Some(piece) = self.buffer.take(self.chunk_size) {
            self.insert_chunk(piece).await?;
        }
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> StorageResult<WriteReceipt> {
        match self.finalize().await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                if let Err(cleanup) = self.discard_chunks().await {
                    warn!("Failed to discard chunks of {}: {}", self.filename, cleanup);
                }
                Err(err)
            }
        }
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.discard_chunks().await
    }
}

/// Position within the chunk documents of an open read stream
#[derive(Debug, Default)]
pub struct ChunkCursor {
    next_n: u32,
    buffer: FrameBuffer,
}

/// Serves a stored file by loading its chunk documents on demand
pub struct ChunkReadStream<C: ChunkClient> {
    client: Arc<C>,
    chunks: String,
    files_id: String,
    length: u64,
    chunk_size: usize,
    md5: Option<String>,
    position: u64,
    state: StreamState<ChunkCursor>,
}

impl<C: ChunkClient> ChunkReadStream<C> {
    pub(crate) fn new(client: Arc<C>, bucket: &str, file: &FileDocument) -> Self {
        Self {
            client,
            chunks: chunks_collection(bucket),
            files_id: file.id.clone(),
            length: file.length,
            chunk_size: (file.chunk_size as usize).max(1),
            md5: file.md5.clone(),
            position: 0,
            state: StreamState::Unopened,
        }
    }
}

#[async_trait]
impl<C: ChunkClient> ReadStream for ChunkReadStream<C> {
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
        HashAlgorithm::Md5
    }

    fn hash_value(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    async fn read_chunk(&mut self, len: usize) -> StorageResult<Bytes> {
        if self.position + len as u64 > self.length {
            return Err(StorageError::unsupported(format!(
                "read of {} bytes at {} past the end of {}",
                len, self.position, self.files_id
            )));
        }

        let cursor = self
            .state
            .get_or_open(|| async { Ok(ChunkCursor::default()) })
            .await?;

        while cursor.buffer.len() < len {
            let chunk = self
                .client
                .find_chunk(&self.chunks, &self.files_id, cursor.next_n)
                .await?
                .ok_or_else(|| {
                    StorageError::not_found("chunk", format!("{}#{}", self.files_id, cursor.next_n))
                })?;
            cursor.buffer.push(&chunk.data);
            cursor.next_n += 1;
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
