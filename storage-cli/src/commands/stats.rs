use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;

use storage_core::{GenericStorage, SizeUnit};

pub async fn run<S>(storage: &S, unit: Option<SizeUnit>, out: &mut dyn Write) -> Result<()>
where
    S: GenericStorage + ?Sized,
{
    let stats = storage.server_stats(unit).await?;
    for line in stat_lines(&stats) {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// `key<padding>: value`, keys padded to the longest one
pub fn stat_lines(stats: &BTreeMap<String, String>) -> Vec<String> {
    let width = stats.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    stats
        .iter()
        .map(|(key, value)| format!("{:width$}: {}", key, value, width = width))
        .collect()
}
