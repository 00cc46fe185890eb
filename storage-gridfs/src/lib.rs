//! GridFS chunk store for `storage-core`.
//!
//! A bucket maps to the collection pair `<bucket>.files` / `<bucket>.chunks`.
//! [`ChunkStorage`] implements the backend contract over any [`ChunkClient`];
//! [`MongoChunkClient`] is the production client built on the MongoDB driver.

pub mod client;
mod mongo;
mod storage;
mod stream;

pub use client::{ChunkClient, ChunkDocument, FileDocument, ServerInfo, DEFAULT_CHUNK_SIZE};
pub use mongo::MongoChunkClient;
pub use storage::ChunkStorage;
pub use stream::{ChunkReadStream, ChunkWriteStream};
