//! # storage-core: backend-agnostic object storage
//!
//! `storage-core` defines the contract every storage backend implements and
//! the pieces shared by all of them:
//!
//! - **Backend contract**: [`GenericStorage`] with [`ReadStream`] and [`WriteStream`]
//! - **Records**: [`BucketRecord`] and [`FileRecord`], recomputed on every listing
//! - **Chunked transfers**: [`TransferEngine`] copies files chunk by chunk with a
//!   rolling hash and verifies the result against the backend
//! - **Progress**: a [`TransferProbe`] shared with an observer task
//! - **Connection strings**: [`ConnectionDescriptor`]
//! - **Sizes**: [`SizeScale`] keeps raw byte counts and scales them for display
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storage_core::prelude::*;
//! use std::path::Path;
//!
//! # async fn upload(storage: &dyn GenericStorage) -> StorageResult<()> {
//! let engine = TransferEngine::new(TransferConfig::default());
//! storage.connect().await?;
//!
//! let outcome = engine.put(storage, "media", Path::new("movie.mkv"), None).await?;
//! println!("{} transferred", outcome.filename);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod error;
mod hash;
pub mod progress;
mod size;
pub mod store;
mod transfer;
mod types;
mod uri;

// Re-export main types for clean API
pub use buffer::FrameBuffer;
pub use config::TransferConfig;
pub use error::{BackendCause, StorageError, StorageResult};
pub use hash::{same_digest, ContentHasher, HashAlgorithm};
pub use progress::{
    format_progress_line, spawn_observer, ProgressSample, ProgressSink, SilentProgress,
    TerminalProgress, TransferProbe,
};
pub use size::{SizeScale, SizeUnit};
pub use store::{GenericStorage, ReadStream, StreamState, WriteStream};
pub use transfer::{ChunkPlan, GetOutcome, PutOutcome, TransferEngine};
pub use types::{
    BucketRecord, FileId, FileRecord, FileRef, RecordStream, WriteReceipt, TIMESTAMP_FORMAT,
    UNKNOWN_TIMESTAMP,
};
pub use uri::{ConnectionDescriptor, Credentials};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BucketRecord, ConnectionDescriptor, FileRecord, FileRef, GenericStorage, ReadStream,
        SizeScale, SizeUnit, StorageError, StorageResult, TransferConfig, TransferEngine,
        WriteStream,
    };
}
