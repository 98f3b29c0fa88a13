//! Banker configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown persistence backend: {0} (expected 'null' or 'sqlite:<url>')")]
    UnknownBackend(String),
}

/// Which snapshot store the master writes through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum PersistenceBackend {
    /// Empty registry on load, no-op save (testing and dev)
    #[default]
    Null,
    /// SQLite key-value snapshot store
    Sqlite { url: String },
}

impl FromStr for PersistenceBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "null" {
            return Ok(PersistenceBackend::Null);
        }
        if let Some(url) = s.strip_prefix("sqlite:") {
            return Ok(PersistenceBackend::Sqlite {
                url: format!("sqlite:{url}"),
            });
        }
        Err(ConfigError::UnknownBackend(s.to_string()))
    }
}

impl TryFrom<String> for PersistenceBackend {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PersistenceBackend> for String {
    fn from(backend: PersistenceBackend) -> Self {
        match backend {
            PersistenceBackend::Null => "null".to_string(),
            PersistenceBackend::Sqlite { url } => url,
        }
    }
}

/// All tuning knobs in one place, threaded through constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BankerConfig {
    /// Seconds between master snapshot saves
    pub save_interval_secs: u64,
    /// Seconds of silence after which commitments are swept
    pub staleness_timeout_secs: u64,
    /// Seconds between slave sync rounds
    pub sync_interval_secs: u64,
    /// Cap on a single `setBalance` movement, in micro-units
    pub default_max_throttle: i64,
    /// Micro-units per currency that `recuperate` leaves behind
    pub safety_float: i64,
    /// Snapshot store selection
    pub persistence: PersistenceBackend,
    /// Namespace for persisted records
    pub top_level_key: String,
    /// HTTP listen address for the master
    pub listen: String,
}

impl Default for BankerConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 10,
            staleness_timeout_secs: 15,
            sync_interval_secs: 1,
            default_max_throttle: 1_000_000_000,
            safety_float: 0,
            persistence: PersistenceBackend::Null,
            top_level_key: "banker".to_string(),
            listen: "127.0.0.1:9985".to_string(),
        }
    }
}

impl BankerConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_secs(self.staleness_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn staleness_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_timeout_secs as i64)
    }
}
