use std::io::Write;

use anyhow::Result;
use futures::TryStreamExt;
use tracing::info;

use storage_core::GenericStorage;

use super::ensure_bucket;

/// Buckets when no bucket is given, otherwise the files of that bucket
pub async fn run<S>(storage: &S, bucket: Option<&str>, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    match bucket {
        None => list_buckets(storage, out).await,
        Some(bucket) => {
            ensure_bucket(storage, bucket).await?;
            info!("Listing files in {}", bucket);
            for record in storage.list(bucket, None).await? {
                writeln!(out, "{}", record)?;
            }
            Ok(())
        }
    }
}

pub async fn list_buckets<S>(storage: &S, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    let mut buckets = storage.bucket_list();
    while let Some(record) = buckets.try_next().await? {
        writeln!(out, "{}", record)?;
    }
    Ok(())
}
