use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

/// Environment variable that overrides the configured connection strings
pub const URL_ENV: &str = "STORAGE_URL";

const CONF_FILE: &str = "storage.conf";
const SETTING_FILE: &str = "storage.setting";

/// Connection strings kept in `<config dir>/storage`.
///
/// `storage.conf` holds one connection string per line (blank lines and
/// `#` comments are skipped); `storage.setting` holds the index of the
/// active one.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    dir: PathBuf,
}

impl ConnectionConfig {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// `storage` under the platform config directory
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
        Ok(Self::new(base.join("storage")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn urls(&self) -> Result<Vec<String>> {
        let path = self.dir.join(CONF_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Index of the active connection string, 0 when never selected
    pub fn selected(&self) -> Result<usize> {
        let path = self.dir.join(SETTING_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => content
                .trim()
                .parse()
                .with_context(|| format!("{} does not hold a connection index", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn select(&self, index: usize) -> Result<()> {
        let count = self.urls()?.len();
        if index >= count {
            bail!("No connection {} ({} configured)", index, count);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(SETTING_FILE);
        fs::write(&path, index.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Selected connection {}", index);
        Ok(())
    }

    pub fn active_url(&self) -> Result<String> {
        let urls = self.urls()?;
        if urls.is_empty() {
            bail!(
                "No connection configured: set {} or add one to {}",
                URL_ENV,
                self.dir.join(CONF_FILE).display()
            );
        }

        let index = self.selected()?;
        urls.get(index)
            .cloned()
            .ok_or_else(|| anyhow!("Selected connection {} out of range ({} configured)", index, urls.len()))
    }
}

/// The explicit URL (flag or `STORAGE_URL`) wins over the configured one
pub fn resolve_url(explicit: Option<&str>, config: &ConnectionConfig) -> Result<String> {
    match explicit.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => Ok(url.to_string()),
        None => config.active_url(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(lines: &str) -> (tempfile::TempDir, ConnectionConfig) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONF_FILE), lines).unwrap();
        let config = ConnectionConfig::new(dir.path());
        (dir, config)
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let (_dir, config) = config_with("# local\nmongodb://localhost/media\n\n  s3://key:secret@minio:9000  \n");

        assert_eq!(
            config.urls().unwrap(),
            vec!["mongodb://localhost/media", "s3://key:secret@minio:9000"]
        );
    }

    #[test]
    fn missing_files_mean_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::new(dir.path().join("absent"));

        assert!(config.urls().unwrap().is_empty());
        assert_eq!(config.selected().unwrap(), 0);
        assert!(config.active_url().is_err());
    }

    #[test]
    fn selection_is_persisted() {
        let (_dir, config) = config_with("mongodb://a/db\nminio://b:9000\n");
        assert_eq!(config.active_url().unwrap(), "mongodb://a/db");

        config.select(1).unwrap();

        assert_eq!(config.selected().unwrap(), 1);
        assert_eq!(config.active_url().unwrap(), "minio://b:9000");
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let (_dir, config) = config_with("mongodb://a/db\n");
        assert!(config.select(3).is_err());
        assert_eq!(config.selected().unwrap(), 0);
    }

    #[test]
    fn explicit_url_wins() {
        let (_dir, config) = config_with("mongodb://a/db\n");

        assert_eq!(resolve_url(Some("s3://x:9000"), &config).unwrap(), "s3://x:9000");
        assert_eq!(resolve_url(Some("  "), &config).unwrap(), "mongodb://a/db");
        assert_eq!(resolve_url(None, &config).unwrap(), "mongodb://a/db");
    }
}
