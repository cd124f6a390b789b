//! Engine settings.
//!
//! Loaded from an optional `staysync.toml` file with a `STAYSYNC_`-prefixed
//! environment overlay, so deployments can run file-less.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{StaySyncError, StaySyncResult};
use crate::store::{CalendarStore, MemoryStore, SqliteStore};

fn default_database() -> String {
    "memory".to_string()
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_bind_addr() -> String {
    "127.0.0.1:8430".to_string()
}

fn default_admin_email() -> String {
    "admin@staysync.local".to_string()
}

fn default_admin_password() -> String {
    "change-me".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// `"memory"` for the arena store, anything else is a SQLite file path.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Bootstrap admin created once at server startup.
    #[serde(default = "default_admin_email")]
    pub default_admin_email: String,

    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,
}

impl Settings {
    /// Load settings from `config_path` (or `./staysync.toml` when `None`),
    /// then apply `STAYSYNC_*` environment variables on top. A missing file
    /// is not an error; every field has a default.
    pub fn load(config_path: Option<&Path>) -> StaySyncResult<Self> {
        let file = match config_path {
            Some(path) => File::from(path.to_path_buf()).required(false),
            None => File::with_name("staysync").required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("STAYSYNC").try_parsing(true))
            .build()
            .map_err(|err| StaySyncError::Config(err.to_string()))?
            .try_deserialize()
            .map_err(|err| StaySyncError::Config(err.to_string()))
    }

    /// Open the store this configuration selects.
    pub fn open_store(&self) -> StaySyncResult<Arc<dyn CalendarStore>> {
        if self.database == "memory" {
            Ok(Arc::new(MemoryStore::new()))
        } else {
            Ok(Arc::new(SqliteStore::open(Path::new(&self.database))?))
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database(),
            sync_interval_secs: default_sync_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            bind_addr: default_bind_addr(),
            default_admin_email: default_admin_email(),
            default_admin_password: default_admin_password(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_the_memory_store() {
        let settings = Settings::default();
        assert_eq!(settings.database, "memory");
        assert_eq!(settings.sync_interval(), Duration::from_secs(300));
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(10));
        // The memory store opens without touching the filesystem
        assert!(settings.open_store().is_ok());
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/staysync.toml"))).unwrap();
        assert_eq!(settings.bind_addr, "127.0.0.1:8430");
    }
}
