use std::fmt;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::{HashAlgorithm, ReadStream, SizeScale, StorageResult};

/// Lazily produced sequence of records
pub type RecordStream<'a, T> = Pin<Box<dyn Stream<Item = StorageResult<T>> + Send + 'a>>;

/// Timestamp layout used by every listing
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Placeholder printed when a bucket has no known upload time
pub const UNKNOWN_TIMESTAMP: &str = "????-??-?? ??:??:??";

/// Backend-opaque identifier of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(pub String);

impl FileId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One logical bucket as reported by a backend listing
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRecord {
    pub name: String,
    pub total_size: SizeScale,
    pub file_count: u64,
    pub latest_upload: Option<DateTime<Utc>>,
    /// Backend-internal structures that make up this bucket, in discovery order
    pub raw_ids: Vec<String>,
}

impl BucketRecord {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            total_size: SizeScale::default(),
            file_count: 0,
            latest_upload: None,
            raw_ids: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> String {
        self.latest_upload
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string())
    }
}

impl fmt::Display for BucketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (size, unit) = self.total_size.scaled();
        write!(
            f,
            "{:032} d {:7.2} {:>2} {} {}",
            self.file_count,
            size,
            unit,
            self.timestamp(),
            self.name
        )
    }
}

/// One stored object, including a read handle over its content
pub struct FileRecord {
    pub id: FileId,
    pub filename: String,
    pub length: SizeScale,
    pub uploaded_at: DateTime<Utc>,
    pub integrity_hash: Option<String>,
    pub hash_algorithm: HashAlgorithm,
    pub stream: Box<dyn ReadStream>,
}

impl fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRecord")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("length", &self.length)
            .field("uploaded_at", &self.uploaded_at)
            .field("integrity_hash", &self.integrity_hash)
            .field("hash_algorithm", &self.hash_algorithm)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (size, unit) = self.length.scaled();
        write!(
            f,
            "{:32} f {:7.2} {:>2} {} {}",
            self.filename,
            size,
            unit,
            self.uploaded_at.format(TIMESTAMP_FORMAT),
            self.integrity_hash.as_deref().unwrap_or("-")
        )
    }
}

/// Target of a delete: a bare identifier or a record obtained from `list`
#[derive(Debug, Clone, Copy)]
pub enum FileRef<'a> {
    Id(&'a FileId),
    Record(&'a FileRecord),
}

impl FileRef<'_> {
    pub fn id(&self) -> &FileId {
        match self {
            FileRef::Id(id) => id,
            FileRef::Record(record) => &record.id,
        }
    }
}

impl<'a> From<&'a FileId> for FileRef<'a> {
    fn from(id: &'a FileId) -> Self {
        FileRef::Id(id)
    }
}

impl<'a> From<&'a FileRecord> for FileRef<'a> {
    fn from(record: &'a FileRecord) -> Self {
        FileRef::Record(record)
    }
}

/// Outcome of closing a write stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub file_id: FileId,
    /// Hash reported by the backend for what it stored
    pub hash: String,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bucket_line_layout() {
        let mut bucket = BucketRecord::new("media");
        bucket.file_count = 3;
        bucket.total_size = SizeScale::new(1536);
        bucket.latest_upload = Some(Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap());

        assert_eq!(
            bucket.to_string(),
            "00000000000000000000000000000003 d    1.50 kb 2024-05-17 08:30:00 media"
        );
    }

    #[test]
    fn bucket_without_uploads_uses_placeholder() {
        let bucket = BucketRecord::new("empty");
        assert_eq!(
            bucket.to_string(),
            "00000000000000000000000000000000 d    0.00  b ????-??-?? ??:??:?? empty"
        );
    }
}
