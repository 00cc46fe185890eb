use std::io::Write;

use anyhow::Result;

use storage_core::ConnectionDescriptor;

use crate::config::ConnectionConfig;

/// List the configured connections, or make `index` the active one
pub fn run(config: &ConnectionConfig, index: Option<usize>, out: &mut dyn Write) -> Result<()> {
    if let Some(index) = index {
        config.select(index)?;
    }

    let urls = config.urls()?;
    if urls.is_empty() {
        writeln!(out, "no connections in {}", config.dir().display())?;
        return Ok(());
    }

    let active = config.selected()?;
    for (i, url) in urls.iter().enumerate() {
        let marker = if i == active { '*' } else { ' ' };
        writeln!(out, "{} {:2} {}", marker, i, redacted(url))?;
    }
    Ok(())
}

/// Passwords never reach the terminal
fn redacted(url: &str) -> String {
    match ConnectionDescriptor::parse(url) {
        Ok(descriptor) => descriptor.to_string(),
        Err(_) => format!("{} (invalid)", url.split('@').last().unwrap_or(url)),
    }
}
