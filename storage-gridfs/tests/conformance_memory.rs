use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use parking_lot::Mutex;

use storage_core::{
    BackendCause, BucketRecord, GenericStorage, HashAlgorithm, ReadStream, SizeUnit,
    StorageError, StorageResult, TransferConfig, TransferEngine, WriteStream,
};
use storage_gridfs::{ChunkClient, ChunkDocument, ChunkStorage, FileDocument, ServerInfo};

#[derive(Default)]
struct MemoryDb {
    connected: bool,
    /// Collection names in creation order
    order: Vec<String>,
    files: BTreeMap<String, Vec<FileDocument>>,
    chunks: BTreeMap<String, Vec<ChunkDocument>>,
    /// `collection:key` of every index created
    indexes: Vec<String>,
}

impl MemoryDb {
    fn touch(&mut self, collection: &str) {
        if !self.order.iter().any(|c| c == collection) {
            self.order.push(collection.to_string());
        }
    }
}

/// In-memory stand-in for a MongoDB database holding GridFS collections
#[derive(Default)]
struct MemoryChunkClient {
    db: Mutex<MemoryDb>,
    corrupt_next_chunk: AtomicBool,
    fail_drop: Mutex<Option<String>>,
}

impl MemoryChunkClient {
    fn with_db<T>(&self, f: impl FnOnce(&mut MemoryDb) -> T) -> StorageResult<T> {
        let mut db = self.db.lock();
        if !db.connected {
            return Err(StorageError::not_connected());
        }
        Ok(f(&mut db))
    }

    fn create_collection(&self, name: &str) {
        self.db.lock().touch(name);
    }

    fn indexes(&self) -> Vec<String> {
        self.db.lock().indexes.clone()
    }

    fn chunk_docs(&self, chunks: &str) -> Vec<ChunkDocument> {
        self.db.lock().chunks.get(chunks).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChunkClient for MemoryChunkClient {
    async fn connect(&self) -> StorageResult<()> {
        self.db.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.db.lock().connected = false;
        Ok(())
    }

    async fn collection_names(&self) -> StorageResult<Vec<String>> {
        self.with_db(|db| db.order.clone())
    }

    async fn collection_size(&self, collection: &str) -> StorageResult<i64> {
        self.with_db(|db| {
            db.chunks
                .get(collection)
                .map(|chunks| chunks.iter().map(|c| c.data.len() as i64).sum())
                .unwrap_or(0)
        })
    }

    async fn count_documents(&self, collection: &str) -> StorageResult<u64> {
        self.with_db(|db| {
            db.files
                .get(collection)
                .map(|files| files.len() as u64)
                .or_else(|| db.chunks.get(collection).map(|c| c.len() as u64))
                .unwrap_or(0)
        })
    }

    async fn latest_upload(&self, files: &str) -> StorageResult<Option<DateTime<Utc>>> {
        self.with_db(|db| {
            db.files
                .get(files)
                .and_then(|files| files.iter().map(|f| f.upload_date).max())
        })
    }

    async fn drop_collection(&self, collection: &str) -> StorageResult<()> {
        if self.fail_drop.lock().as_deref() == Some(collection) {
            return Err(StorageError::backend_message(BackendCause::Server, "drop refused"));
        }
        self.with_db(|db| {
            db.order.retain(|c| c != collection);
            db.files.remove(collection);
            db.chunks.remove(collection);
        })
    }

    async fn ensure_indexes(&self, files: &str, chunks: &str) -> StorageResult<()> {
        self.with_db(|db| {
            for index in [format!("{chunks}:files_id_1_n_1"), format!("{files}:filename_1_uploadDate_1")] {
                if !db.indexes.contains(&index) {
                    db.indexes.push(index);
                }
            }
            db.touch(files);
            db.touch(chunks);
        })
    }

    async fn find_files(&self, files: &str, filename: Option<&str>) -> StorageResult<Vec<FileDocument>> {
        self.with_db(|db| {
            db.files
                .get(files)
                .map(|docs| {
                    docs.iter()
                        .filter(|f| filename.map_or(true, |name| f.filename.contains(name)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn insert_file(&self, files: &str, file: FileDocument) -> StorageResult<()> {
        self.with_db(|db| {
            db.touch(files);
            db.files.entry(files.to_string()).or_default().push(file);
        })
    }

    async fn delete_file(&self, files: &str, id: &str) -> StorageResult<()> {
        self.with_db(|db| {
            if let Some(docs) = db.files.get_mut(files) {
                docs.retain(|f| f.id != id);
            }
        })
    }

    async fn insert_chunk(&self, chunks: &str, mut chunk: ChunkDocument) -> StorageResult<()> {
        if !chunk.data.is_empty() && self.corrupt_next_chunk.swap(false, Ordering::SeqCst) {
            let mut data = chunk.data.to_vec();
            data[0] ^= 0xff;
            chunk.data = Bytes::from(data);
        }
        self.with_db(|db| {
            db.touch(chunks);
            db.chunks.entry(chunks.to_string()).or_default().push(chunk);
        })
    }

    async fn find_chunk(&self, chunks: &str, files_id: &str, n: u32) -> StorageResult<Option<ChunkDocument>> {
        self.with_db(|db| {
            db.chunks
                .get(chunks)
                .and_then(|docs| docs.iter().find(|c| c.files_id == files_id && c.n == n).cloned())
        })
    }

    async fn delete_chunks(&self, chunks: &str, files_id: &str) -> StorageResult<u64> {
        self.with_db(|db| match db.chunks.get_mut(chunks) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|c| c.files_id != files_id);
                (before - docs.len()) as u64
            }
            None => 0,
        })
    }

    async fn file_md5(&self, bucket: &str, files_id: &str) -> StorageResult<String> {
        let chunks = format!("{bucket}.chunks");
        self.with_db(|db| {
            let mut docs: Vec<&ChunkDocument> = db
                .chunks
                .get(&chunks)
                .map(|docs| docs.iter().filter(|c| c.files_id == files_id).collect())
                .unwrap_or_default();
            docs.sort_by_key(|c| c.n);

            let mut hasher = HashAlgorithm::Md5.hasher();
            for doc in docs {
                hasher.update(&doc.data);
            }
            hasher.finalize()
        })
    }

    async fn server_info(&self) -> StorageResult<ServerInfo> {
        self.with_db(|db| ServerInfo {
            version: "7.0.2".to_string(),
            database: "media".to_string(),
            storage_size: 2 * 1024 * 1024,
            data_size: db
                .chunks
                .values()
                .flat_map(|c| c.iter().map(|d| d.data.len() as i64))
                .sum(),
            collections: db.order.len() as i64,
        })
    }
}

/// Test factory functions
async fn create_storage(chunk_size: usize) -> ChunkStorage<MemoryChunkClient> {
    let storage = ChunkStorage::new(MemoryChunkClient::default()).with_chunk_size(chunk_size);
    storage.connect().await.unwrap();
    storage
}

fn engine() -> TransferEngine {
    TransferEngine::new(TransferConfig::default())
}

fn write_source(dir: &tempfile::TempDir, name: &str, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

async fn buckets(storage: &ChunkStorage<MemoryChunkClient>) -> Vec<BucketRecord> {
    storage.bucket_list().try_collect().await.unwrap()
}

/// Files of every size around the chunk boundary survive a put/get round trip
#[tokio::test]
async fn test_round_trip_around_chunk_boundary() {
    const CHUNK: usize = 64;
    let storage = create_storage(CHUNK).await;
    let dir = tempfile::tempdir().unwrap();

    for size in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1] {
        let name = format!("file-{size}.bin");
        let source = write_source(&dir, &name, size);

        // Act
        let outcome = engine().put(&storage, "sizes", &source, None).await.unwrap();
        let target = dir.path().join(format!("{name}.out"));
        let fetched = engine()
            .get(&storage, "sizes", Some(&name), &target)
            .await
            .unwrap();

        // Assert
        let chunk_count = storage
            .client()
            .chunk_docs("sizes.chunks")
            .iter()
            .filter(|c| c.files_id == outcome.receipt.file_id.as_str())
            .count();
        assert_eq!(chunk_count, size.div_ceil(CHUNK), "chunks for {size} bytes");
        assert!(fetched[0].verified);
        assert_eq!(std::fs::read(&target).unwrap(), std::fs::read(&source).unwrap());
    }
}

/// Re-uploading the same filename leaves exactly one record
#[tokio::test]
async fn test_successive_uploads_leave_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "report.pdf", 500);

    for uploads in [1, 2, 5] {
        let storage = create_storage(128).await;
        for _ in 0..uploads {
            engine().put(&storage, "docs", &source, None).await.unwrap();
        }

        let records = storage.list("docs", Some("report.pdf")).await.unwrap();
        assert_eq!(records.len(), 1, "after {uploads} upload(s)");
        assert_eq!(storage.client().chunk_docs("docs.chunks").len(), 4);
    }
}

/// A chunk corrupted in transit fails verification and leaves nothing behind
#[tokio::test]
async fn test_corrupted_chunk_is_integrity_error() {
    let storage = create_storage(100).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "photo.raw", 350);
    storage.client().corrupt_next_chunk.store(true, Ordering::SeqCst);

    let err = engine().put(&storage, "pics", &source, None).await.unwrap_err();

    assert!(err.is_integrity());
    assert!(storage.list("pics", None).await.unwrap().is_empty());
    assert!(storage.client().chunk_docs("pics.chunks").is_empty());
}

#[tokio::test]
async fn test_empty_store_lists_no_buckets() {
    let storage = create_storage(64).await;
    assert!(buckets(&storage).await.is_empty());
}

/// Each complete files/chunks pair is one bucket with aggregated size and count
#[tokio::test]
async fn test_bucket_list_aggregates_pairs() {
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();

    // Arrange: three buckets with 1, 2, 3 files of 100 bytes
    for (i, bucket) in ["alpha", "beta", "gamma"].iter().enumerate() {
        for n in 0..=i {
            let source = write_source(&dir, &format!("{bucket}-{n}.txt"), 100);
            engine().put(&storage, bucket, &source, None).await.unwrap();
        }
    }
    storage.client().create_collection("users");
    storage.client().create_collection("orphan.chunks");

    // Act
    let mut records = buckets(&storage).await;
    records.sort_by(|a, b| a.name.cmp(&b.name));

    // Assert
    assert_eq!(records.len(), 3);
    for (i, record) in records.iter().enumerate() {
        let files = i as u64 + 1;
        assert_eq!(record.file_count, files);
        assert_eq!(record.total_size.bytes(), 100 * files as i64);
        assert!(record.latest_upload.is_some());
        assert_eq!(record.raw_ids.len(), 2);
    }
}

#[tokio::test]
async fn test_drop_missing_bucket_is_not_found() {
    let storage = create_storage(64).await;
    let err = storage.drop_bucket("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_drop_bucket_removes_both_collections() {
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "a.txt", 10);
    engine().put(&storage, "tmp", &source, None).await.unwrap();
    assert!(storage.bucket_exists("tmp").await.unwrap());

    storage.drop_bucket("tmp").await.unwrap();

    assert!(!storage.bucket_exists("tmp").await.unwrap());
    assert!(buckets(&storage).await.is_empty());
}

/// A failing collection drop names the collection that was left behind
#[tokio::test]
async fn test_partial_drop_names_collection() {
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "a.txt", 10);
    engine().put(&storage, "half", &source, None).await.unwrap();
    *storage.client().fail_drop.lock() = Some("half.files".to_string());

    let err = storage.drop_bucket("half").await.unwrap_err();

    assert_eq!(err.cause(), Some(BackendCause::PartialDrop));
    assert!(err.to_string().contains("half.files"));
    assert!(storage.bucket_exists("half").await.unwrap());

    // The leftover collection keeps the bucket visible so the drop can be retried
    *storage.client().fail_drop.lock() = None;
    storage.drop_bucket("half").await.unwrap();
    assert!(!storage.bucket_exists("half").await.unwrap());
}

/// A zero-byte upload into a fresh bucket is reachable through every listing
#[tokio::test]
async fn test_empty_file_in_fresh_bucket_is_visible() {
    // Arrange
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "empty.txt", 0);

    // Act
    engine().put(&storage, "fresh", &source, None).await.unwrap();

    // Assert
    assert!(storage.client().chunk_docs("fresh.chunks").is_empty());
    assert!(storage.bucket_exists("fresh").await.unwrap());
    assert_eq!(storage.list("fresh", Some("empty.txt")).await.unwrap().len(), 1);
    let records = buckets(&storage).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file_count, 1);
    let target = dir.path().join("empty.out");
    let fetched = engine().get(&storage, "fresh", Some("empty.txt"), &target).await.unwrap();
    assert!(fetched[0].verified);
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 0);
}

/// Opening a write stream creates the GridFS indexes once per bucket
#[tokio::test]
async fn test_write_stream_creates_indexes() {
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "indexed.txt", 10);

    for _ in 0..3 {
        engine().put(&storage, "idx", &source, None).await.unwrap();
    }

    assert_eq!(
        storage.client().indexes(),
        vec!["idx.chunks:files_id_1_n_1", "idx.files:filename_1_uploadDate_1"]
    );
}

/// 10 MiB with 1 MiB chunks is ten full chunks and one record
#[tokio::test]
async fn test_ten_mebibytes_in_one_mebibyte_chunks() {
    const MIB: usize = 1024 * 1024;
    let storage = create_storage(MIB).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "video.mp4", 10 * MIB);

    let outcome = engine().put(&storage, "videos", &source, None).await.unwrap();

    let chunks = storage.client().chunk_docs("videos.chunks");
    assert_eq!(chunks.len(), 10);
    assert!(chunks.iter().all(|c| c.data.len() == MIB));

    let records = storage.list("videos", None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].length.bytes(), 10 * MIB as i64);
    assert_eq!(records[0].integrity_hash.as_deref(), Some(outcome.local_hash.as_str()));
}

/// Aborting a write stream removes the chunks written so far
#[tokio::test]
async fn test_abort_discards_chunks() {
    let storage = create_storage(4).await;
    let mut stream = storage.new_write_stream("b", "partial", 12).await.unwrap();
    stream.write(Bytes::from_static(b"0123456789")).await.unwrap();
    assert_eq!(storage.client().chunk_docs("b.chunks").len(), 2);

    stream.abort().await.unwrap();

    assert!(storage.client().chunk_docs("b.chunks").is_empty());
    assert!(storage.list("b", None).await.unwrap().is_empty());
}

/// The filename filter is a literal substring match
#[tokio::test]
async fn test_list_filters_by_substring() {
    let storage = create_storage(64).await;
    let dir = tempfile::tempdir().unwrap();
    for name in ["holiday.jpg", "holiday.png", "work.txt"] {
        let source = write_source(&dir, name, 5);
        engine().put(&storage, "mix", &source, None).await.unwrap();
    }

    assert_eq!(storage.list("mix", Some("holiday")).await.unwrap().len(), 2);
    assert_eq!(storage.list("mix", Some("txt")).await.unwrap().len(), 1);
    assert_eq!(storage.list("mix", None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_operations_require_connect() {
    let storage = ChunkStorage::new(MemoryChunkClient::default());
    let err = storage.bucket_exists("any").await.unwrap_err();
    assert_eq!(err.cause(), Some(BackendCause::NotConnected));
}

#[tokio::test]
async fn test_server_stats_render_sizes() {
    let storage = create_storage(64).await;

    let scaled = storage.server_stats(None).await.unwrap();
    assert_eq!(scaled["server version"], "7.0.2");
    assert_eq!(scaled["db"], "media");
    assert_eq!(scaled["storage size"], "2.00 mb");

    let fixed = storage.server_stats(Some(SizeUnit::Kilo)).await.unwrap();
    assert_eq!(fixed["storage size"], "2048.00 kb");
}

/// Reading a file lazily loads chunk documents and refuses to read past the end
#[tokio::test]
async fn test_read_stream_lifecycle() {
    let storage = create_storage(4).await;
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "ten.bin", 10);
    engine().put(&storage, "r", &source, None).await.unwrap();

    let mut record = storage.list("r", None).await.unwrap().remove(0);
    assert_eq!(record.stream.chunk_size(), 4);
    assert_eq!(record.stream.len(), 10);

    let head = record.stream.read_chunk(6).await.unwrap();
    assert_eq!(head.as_ref(), &std::fs::read(&source).unwrap()[..6]);
    assert_eq!(record.stream.position(), 6);
    assert!(record.stream.read_chunk(5).await.is_err());

    record.stream.close().await.unwrap();
    assert!(record.stream.is_closed());
    assert!(record.stream.read_chunk(1).await.is_err());
}
