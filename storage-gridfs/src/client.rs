use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use storage_core::StorageResult;

/// Suffix of the collection holding file documents
pub const FILES_SUFFIX: &str = "files";

/// Suffix of the collection holding chunk documents
pub const CHUNKS_SUFFIX: &str = "chunks";

/// Default chunk size used by GridFS writers (255 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

pub fn files_collection(bucket: &str) -> String {
    format!("{bucket}.{FILES_SUFFIX}")
}

pub fn chunks_collection(bucket: &str) -> String {
    format!("{bucket}.{CHUNKS_SUFFIX}")
}

/// `{_id, length, chunkSize, uploadDate, filename, md5}` entry of `<bucket>.files`
#[derive(Debug, Clone, PartialEq)]
pub struct FileDocument {
    pub id: String,
    pub filename: String,
    pub length: u64,
    pub chunk_size: u32,
    pub upload_date: DateTime<Utc>,
    pub md5: Option<String>,
}

/// `{_id, files_id, n, data}` entry of `<bucket>.chunks`
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDocument {
    pub files_id: String,
    pub n: u32,
    pub data: Bytes,
}

/// Server identity and database usage as reported by `buildInfo` and `dbStats`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub version: String,
    pub database: String,
    pub storage_size: i64,
    pub data_size: i64,
    pub collections: i64,
}

/// Document-database operations the chunk store needs.
///
/// Collection arguments are full names (`<bucket>.files`, `<bucket>.chunks`);
/// ids are the string form of the stored `_id`.
#[async_trait]
pub trait ChunkClient: Send + Sync + 'static {
    /// Open the session and verify the server accepts our credentials
    async fn connect(&self) -> StorageResult<()>;

    async fn disconnect(&self) -> StorageResult<()>;

    async fn collection_names(&self) -> StorageResult<Vec<String>>;

    /// Data size of a collection in bytes
    async fn collection_size(&self, collection: &str) -> StorageResult<i64>;

    async fn count_documents(&self, collection: &str) -> StorageResult<u64>;

    /// Most recent `uploadDate` in a files collection
    async fn latest_upload(&self, files: &str) -> StorageResult<Option<DateTime<Utc>>>;

    async fn drop_collection(&self, collection: &str) -> StorageResult<()>;

    /// Create the GridFS indexes (`{files_id, n}` unique on chunks, `{filename,
    /// uploadDate}` on files), creating both collections when missing. Idempotent.
    async fn ensure_indexes(&self, files: &str, chunks: &str) -> StorageResult<()>;

    /// File documents whose filename contains `filename` (all when `None`), oldest first
    async fn find_files(&self, files: &str, filename: Option<&str>) -> StorageResult<Vec<FileDocument>>;

    async fn insert_file(&self, files: &str, file: FileDocument) -> StorageResult<()>;

    async fn delete_file(&self, files: &str, id: &str) -> StorageResult<()>;

    async fn insert_chunk(&self, chunks: &str, chunk: ChunkDocument) -> StorageResult<()>;

    async fn find_chunk(&self, chunks: &str, files_id: &str, n: u32) -> StorageResult<Option<ChunkDocument>>;

    /// Remove every chunk of a file, returning how many were deleted
    async fn delete_chunks(&self, chunks: &str, files_id: &str) -> StorageResult<u64>;

    /// Server-side md5 over the stored chunks of a file
    async fn file_md5(&self, bucket: &str, files_id: &str) -> StorageResult<String>;

    async fn server_info(&self) -> StorageResult<ServerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_follow_gridfs_layout() {
        assert_eq!(files_collection("fs"), "fs.files");
        assert_eq!(chunks_collection("media.v2"), "media.v2.chunks");
    }
}
