//! One module per subcommand. Every command writes its result lines to the
//! given writer so stdout stays free of log output.

pub mod bucket;
pub mod conn;
pub mod get;
pub mod ls;
pub mod put;
pub mod rm;
pub mod stats;

use storage_core::{GenericStorage, StorageError, StorageResult};

/// Fail with `NotFound` unless the bucket exists
pub(crate) async fn ensure_bucket<S>(storage: &S, bucket: &str) -> StorageResult<()>
where
    S: GenericStorage + ?Sized,
{
    if storage.bucket_exists(bucket).await? {
        Ok(())
    } else {
        Err(StorageError::not_found("bucket", bucket))
    }
}
