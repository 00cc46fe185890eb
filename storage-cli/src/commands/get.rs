use std::io::Write;
use std::path::Path;

use anyhow::Result;

use storage_core::{GenericStorage, TransferEngine};

use super::ensure_bucket;

/// Download the file named `filename` (every file without one) into `destination`
pub async fn run<S>(
    storage: &S,
    engine: &TransferEngine,
    bucket: &str,
    filename: Option<&str>,
    destination: &Path,
    out: &mut dyn Write,
) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    ensure_bucket(storage, bucket).await?;

    for outcome in engine.get(storage, bucket, filename, destination).await? {
        if outcome.verified {
            writeln!(out, "{} transferred", outcome.filename)?;
        } else {
            writeln!(out, "{} transferred (unverified)", outcome.filename)?;
        }
    }
    Ok(())
}
