use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::hash::same_digest;
use crate::progress::{spawn_observer, ProgressSink, SilentProgress, TransferProbe};
use crate::{
    FileRecord, FileRef, GenericStorage, HashAlgorithm, ReadStream, StorageError, StorageResult,
    TransferConfig, WriteReceipt, WriteStream,
};

/// Splits a transfer of `total` bytes into chunks of at most `chunk_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(total: u64, chunk_size: usize) -> Self {
        Self {
            total,
            chunk_size: (chunk_size as u64).max(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn full_chunks(&self) -> u64 {
        self.total / self.chunk_size
    }

    pub fn remainder(&self) -> u64 {
        self.total % self.chunk_size
    }

    /// Number of write calls the plan produces
    pub fn chunk_count(&self) -> u64 {
        self.full_chunks() + u64::from(self.remainder() > 0)
    }

    /// Chunk lengths in transfer order
    pub fn chunks(&self) -> impl Iterator<Item = usize> {
        let full = std::iter::repeat(self.chunk_size as usize).take(self.full_chunks() as usize);
        let tail = Some(self.remainder() as usize).filter(|len| *len > 0);
        full.chain(tail)
    }
}

/// Result of a verified upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub filename: String,
    pub receipt: WriteReceipt,
    pub local_hash: String,
    /// Older files with the same name removed after verification
    pub pruned: usize,
}

/// Result of one downloaded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOutcome {
    pub filename: String,
    pub path: PathBuf,
    pub local_hash: String,
    /// False when the backend had no hash to compare against
    pub verified: bool,
}

/// Drives chunked uploads and downloads against any backend
#[derive(Clone)]
pub struct TransferEngine {
    config: TransferConfig,
    sink: Arc<dyn ProgressSink>,
}

impl TransferEngine {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            sink: Arc::new(SilentProgress),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload a local file, verify it against the backend hash and prune older copies.
    #[instrument(skip(self, storage), fields(backend = storage.kind(), source = %source.display()))]
    pub async fn put<S>(
        &self,
        storage: &S,
        bucket: &str,
        source: &Path,
        filename: Option<&str>,
    ) -> StorageResult<PutOutcome>
    where
        S: GenericStorage + ?Sized,
    {
        let source = match tokio::fs::canonicalize(source).await {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found("source", source.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = tokio::fs::metadata(&source).await?;
        if !metadata.is_file() {
            return Err(StorageError::unsupported(format!(
                "uploading '{}' which is not a regular file",
                source.display()
            )));
        }
        let size = metadata.len();

        let filename = match filename {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    StorageError::configuration(format!("'{}' has no file name", source.display()))
                })?,
        };

        let mut stream = storage.new_write_stream(bucket, &filename, size).await?;
        let plan = ChunkPlan::new(size, stream.chunk_size());
        debug!(
            "Uploading {} bytes as {} chunk(s) of {} bytes",
            size,
            plan.chunk_count(),
            plan.chunk_size()
        );

        let probe = Arc::new(TransferProbe::new(filename.clone(), size));
        let observer = spawn_observer(probe.clone(), self.sink.clone(), &self.config);

        let local_hash = match upload_chunks(&source, &plan, stream.as_mut(), &probe).await {
            Ok(hash) => hash,
            Err(err) => {
                probe.close();
                self.join_observer(observer, &filename).await;
                if let Err(abort_err) = stream.abort().await {
                    warn!("Failed to abort upload of {}: {}", filename, abort_err);
                }
                return Err(err);
            }
        };

        let closed = stream.close().await;
        probe.close();
        self.join_observer(observer, &filename).await;
        let receipt = closed?;

        if !same_digest(&local_hash, &receipt.hash) {
            warn!(
                "Hash mismatch for {}: local {} remote {}, removing upload",
                filename, local_hash, receipt.hash
            );
            storage.delete(bucket, FileRef::Id(&receipt.file_id)).await?;
            return Err(StorageError::Integrity {
                name: filename,
                local: local_hash,
                remote: receipt.hash,
            });
        }

        let mut pruned = 0;
        if self.config.prune_previous {
            let previous = storage.list(bucket, Some(&filename)).await?;
            for record in previous
                .iter()
                .filter(|record| record.filename == filename && record.id != receipt.file_id)
            {
                storage.delete(bucket, FileRef::Record(record)).await?;
                pruned += 1;
            }
        }

        info!("Uploaded {} to {} ({} previous removed)", filename, bucket, pruned);
        Ok(PutOutcome {
            filename,
            receipt,
            local_hash,
            pruned,
        })
    }

    /// Download every file named exactly `filename` (all files when `None`).
    ///
    /// Stops at the first failure; files already written stay in place.
    #[instrument(skip(self, storage), fields(backend = storage.kind(), destination = %destination.display()))]
    pub async fn get<S>(
        &self,
        storage: &S,
        bucket: &str,
        filename: Option<&str>,
        destination: &Path,
    ) -> StorageResult<Vec<GetOutcome>>
    where
        S: GenericStorage + ?Sized,
    {
        let mut records = storage.list(bucket, filename).await?;
        // Backend filters are loose (substring or prefix)
        if let Some(name) = filename {
            records.retain(|record| record.filename == name);
        }
        if records.is_empty() {
            return Err(StorageError::not_found(
                "file",
                format!("{}/{}", bucket, filename.unwrap_or("*")),
            ));
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.download(record, destination).await?);
        }
        Ok(outcomes)
    }

    async fn download(&self, mut record: FileRecord, destination: &Path) -> StorageResult<GetOutcome> {
        let is_dir = tokio::fs::metadata(destination)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        let target = if is_dir {
            let target = destination.join(contained_path(&record.filename)?);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            target
        } else {
            destination.to_path_buf()
        };

        match tokio::fs::remove_file(&target).await {
            Ok(()) => debug!("Removed existing {}", target.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let total = record.stream.len();
        let plan = ChunkPlan::new(total, record.stream.chunk_size());
        let probe = Arc::new(TransferProbe::new(record.filename.clone(), total));
        let observer = spawn_observer(probe.clone(), self.sink.clone(), &self.config);

        let copied = download_chunks(
            record.stream.as_mut(),
            record.hash_algorithm,
            &target,
            &plan,
            &probe,
        )
        .await;
        let closed = record.stream.close().await;
        probe.close();
        self.join_observer(observer, &record.filename).await;

        let local_hash = copied?;
        closed?;

        let remote = record
            .stream
            .hash_value()
            .map(str::to_string)
            .or_else(|| record.integrity_hash.clone());

        let verified = match remote {
            Some(remote) if same_digest(&local_hash, &remote) => true,
            Some(remote) => {
                return Err(StorageError::Integrity {
                    name: record.filename,
                    local: local_hash,
                    remote,
                })
            }
            None => {
                warn!("{} has no stored hash, transferred unverified", record.filename);
                false
            }
        };

        info!("Downloaded {} to {}", record.filename, target.display());
        Ok(GetOutcome {
            filename: record.filename,
            path: target,
            local_hash,
            verified,
        })
    }

    async fn join_observer(&self, observer: JoinHandle<()>, name: &str) {
        if let Err(e) = observer.await {
            warn!("Progress observer for {} failed: {}", name, e);
        }
        self.sink.finish(name);
    }
}

/// Relative path for a stored filename that cannot leave the destination directory
fn contained_path(filename: &str) -> StorageResult<PathBuf> {
    let path = Path::new(filename);
    let contained = path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if contained {
        Ok(path.to_path_buf())
    } else {
        Err(StorageError::unsupported(format!(
            "downloading '{}' which would escape the destination directory",
            filename
        )))
    }
}

async fn upload_chunks(
    source: &Path,
    plan: &ChunkPlan,
    stream: &mut dyn WriteStream,
    probe: &TransferProbe,
) -> StorageResult<String> {
    let mut file = File::open(source).await?;
    let mut hasher = stream.hash_algorithm().hasher();

    for len in plan.chunks() {
        let mut chunk = vec![0u8; len];
        file.read_exact(&mut chunk).await?;
        hasher.update(&chunk);
        stream.write(Bytes::from(chunk)).await?;
        probe.advance(len as u64);
    }

    Ok(hasher.finalize())
}

async fn download_chunks(
    stream: &mut dyn ReadStream,
    algorithm: HashAlgorithm,
    target: &Path,
    plan: &ChunkPlan,
    probe: &TransferProbe,
) -> StorageResult<String> {
    let mut file = File::create(target).await?;
    let mut hasher = algorithm.hasher();

    for len in plan.chunks() {
        let chunk = stream.read_chunk(len).await?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        probe.advance(len as u64);
    }

    file.flush().await?;
    Ok(hasher.finalize())
}
