//! Alert snapshot storage.
//!
//! Snapshots land in a directory served by Home Assistant (`/config/www` is
//! exposed as `/local`). Each save writes a timestamped history file and
//! overwrites `{camera}_latest.jpg`; the returned URL points at the latter with
//! a cache-busting query parameter.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

pub const DEFAULT_SNAPSHOT_DIR: &str = "/config/www/gate-monitor";
pub const DEFAULT_SNAPSHOT_URL_PREFIX: &str = "/local/gate-monitor";

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    url_prefix: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the snapshot and return its URL-style path.
    pub fn save<Tz>(&self, jpeg: &[u8], camera: &str, now: &DateTime<Tz>) -> Result<String>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create snapshot dir {}", self.dir.display()))?;

        let history = self
            .dir
            .join(format!("{}_{}.jpg", camera, now.format("%Y%m%d_%H%M%S")));
        std::fs::write(&history, jpeg)
            .with_context(|| format!("failed to write snapshot {}", history.display()))?;

        let latest_name = format!("{}_latest.jpg", camera);
        let latest = self.dir.join(&latest_name);
        std::fs::write(&latest, jpeg)
            .with_context(|| format!("failed to write snapshot {}", latest.display()))?;

        log::info!("saved snapshot to {}", history.display());
        Ok(format!(
            "{}/{}?v={}",
            self.url_prefix,
            latest_name,
            now.timestamp()
        ))
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_DIR, DEFAULT_SNAPSHOT_URL_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn save_writes_history_and_latest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(dir.path().join("gate-monitor"), "/local/gate-monitor/");
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 7, 30, 5).unwrap();

        let url = store.save(b"jpeg-bytes", "exterior_frente", &now)?;

        assert_eq!(
            url,
            format!(
                "/local/gate-monitor/exterior_frente_latest.jpg?v={}",
                now.timestamp()
            )
        );
        let history = store.dir().join("exterior_frente_20261019_073005.jpg");
        assert_eq!(std::fs::read(history)?, b"jpeg-bytes");
        let latest = store.dir().join("exterior_frente_latest.jpg");
        assert_eq!(std::fs::read(&latest)?, b"jpeg-bytes");

        let later = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        store.save(b"newer", "exterior_frente", &later)?;
        assert_eq!(std::fs::read(&latest)?, b"newer");
        Ok(())
    }

    #[test]
    fn unwritable_dir_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x")?;
        let store = SnapshotStore::new(blocker.join("sub"), "/local/gate-monitor");
        assert!(store.save(b"jpeg", "cam", &Utc::now()).is_err());
        Ok(())
    }
}
