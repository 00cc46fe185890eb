use std::io::Write;
use std::path::Path;

use anyhow::Result;

use storage_core::{GenericStorage, TransferEngine};

/// Upload one file; the bucket is created on demand
pub async fn run<S>(
    storage: &S,
    engine: &TransferEngine,
    bucket: &str,
    source: &Path,
    filename: Option<&str>,
    out: &mut dyn Write,
) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    let outcome = engine.put(storage, bucket, source, filename).await?;
    writeln!(out, "{} transferred", outcome.filename)?;
    Ok(())
}
