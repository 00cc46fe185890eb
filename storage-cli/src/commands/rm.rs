use std::io::Write;

use anyhow::Result;
use tracing::info;

use storage_core::{FileRef, GenericStorage, StorageError};

use super::ensure_bucket;

/// Remove every file named `filename`, or the whole bucket without one
pub async fn run<S>(storage: &S, bucket: &str, filename: Option<&str>, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    ensure_bucket(storage, bucket).await?;

    let Some(filename) = filename else {
        storage.drop_bucket(bucket).await?;
        writeln!(out, "{} removed", bucket)?;
        return Ok(());
    };

    let records = storage.list(bucket, Some(filename)).await?;
    let matching: Vec<_> = records.iter().filter(|r| r.filename == filename).collect();
    if matching.is_empty() {
        return Err(StorageError::not_found("file", format!("{}/{}", bucket, filename)).into());
    }

    for record in matching {
        storage.delete(bucket, FileRef::Record(record)).await?;
        info!("Removed {} ({})", record.filename, record.id);
    }
    writeln!(out, "{} removed", filename)?;
    Ok(())
}
