//! Persistent settings.
//!
//! Settings live in `<config_dir>/postbox/settings.json`. Every field has a
//! default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Directory name used under the platform config, cache and data dirs.
const APP_DIR: &str = "postbox";

/// Settings that persist across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where persisted messages wait for delivery.
    pub outbox_dir: PathBuf,
    /// Scratch directory for renamed attachments.
    pub staging_dir: PathBuf,
    /// `SQLite` database holding job state.
    pub database_path: PathBuf,
    /// SMTP connection timeout in seconds.
    pub smtp_timeout_secs: u64,
    /// Jobs that may wait in the expedited queue at once.
    pub expedited_capacity: usize,
    /// Queue as normal work when the expedited queue is full.
    pub fallback_to_normal: bool,
    /// Remove the persisted message once it was sent.
    pub delete_on_success: bool,
    /// Job status polling interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let cache = base_dir(dirs::cache_dir());
        let data = base_dir(dirs::data_dir());

        Self {
            outbox_dir: cache.join("outbox"),
            staging_dir: data.join("staging"),
            database_path: data.join("jobs.db"),
            smtp_timeout_secs: 30,
            expedited_capacity: 8,
            fallback_to_normal: true,
            delete_on_success: true,
            poll_interval_ms: 250,
        }
    }
}

fn base_dir(platform: Option<PathBuf>) -> PathBuf {
    platform
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Settings {
    /// Default location of the settings file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        base_dir(dirs::config_dir()).join("settings.json")
    }

    /// Load settings from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()).await
    }

    /// Load settings from `path`, falling back to defaults if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Save settings to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents =
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        tokio::fs::write(path, contents).await?;

        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// SMTP connection timeout.
    #[must_use]
    pub const fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    /// Scheduler tuning derived from these settings.
    #[must_use]
    pub const fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            expedited_capacity: self.expedited_capacity,
            fallback_to_normal: self.fallback_to_normal,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Settings rooted in a single directory. Useful for tests and portable
    /// installs.
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            outbox_dir: root.join("outbox"),
            staging_dir: root.join("staging"),
            database_path: root.join("jobs.db"),
            ..Self::default()
        }
    }
}
