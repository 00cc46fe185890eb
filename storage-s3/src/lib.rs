//! S3 / MinIO object store for `storage-core`.
//!
//! Uploads below the part size are buffered and sent with a single PUT;
//! larger ones use a multipart upload. Every object carries its sha256 as
//! `x-amz-meta-sha256` user metadata, which downloads verify against.

pub mod client;
mod aws;
mod storage;
mod stream;

pub use aws::{AwsObjectClient, S3Config};
pub use client::{
    content_md5, BodyStream, BucketInfo, ObjectBody, ObjectClient, ObjectHead, ObjectInfo,
    UploadedPart, MIN_PART_SIZE, SHA256_METADATA,
};
pub use storage::{ObjectStorage, READ_CHUNK_SIZE};
pub use stream::{ObjectReadStream, ObjectWriteStream};
