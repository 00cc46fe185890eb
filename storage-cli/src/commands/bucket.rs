use std::io::Write;

use anyhow::Result;

use storage_core::GenericStorage;

use super::{ensure_bucket, ls};

pub async fn list<S>(storage: &S, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    ls::list_buckets(storage, out).await
}

/// Buckets have no standalone creation; the first `put` makes them
pub async fn create<S>(storage: &S, name: &str, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    if storage.bucket_exists(name).await? {
        writeln!(out, "{} already exists", name)?;
    } else {
        writeln!(out, "{} will be created by the first put", name)?;
    }
    Ok(())
}

pub async fn remove<S>(storage: &S, name: &str, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    ensure_bucket(storage, name).await?;
    storage.drop_bucket(name).await?;
    writeln!(out, "{} removed", name)?;
    Ok(())
}
