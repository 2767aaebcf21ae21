//! Configuration schema for Hangar
//!
//! Configuration is stored at `~/.config/hangar/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Store settings
    pub database: DatabaseConfig,

    /// Resource checking settings
    pub radar: RadarConfig,

    /// Garbage collection settings
    pub gc: GcConfig,

    /// Local worker settings
    pub worker: WorkerConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// SQLite store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (defaults to `<state dir>/hangar.db`)
    pub path: Option<PathBuf>,

    /// Connection pool size
    pub max_connections: u32,

    /// How long a writer waits on a locked database
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

/// Resource checking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Interval used when a resource does not set `check_every`
    pub default_check_interval_secs: u64,

    /// Lease on a checking lock; a crashed holder loses it after this long
    pub lock_lease_secs: u64,

    /// Lifetime of a check-session container
    pub check_session_ttl_secs: u64,

    /// Exposed to check scripts as ATC_EXTERNAL_URL
    pub external_url: String,
}

impl RadarConfig {
    pub fn default_check_interval(&self) -> Duration {
        Duration::from_secs(self.default_check_interval_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn check_session_ttl(&self) -> Duration {
        Duration::from_secs(self.check_session_ttl_secs)
    }
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            default_check_interval_secs: 60,
            lock_lease_secs: 300,
            check_session_ttl_secs: 300,
            external_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Garbage collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// One-off builds keep their image caches this long after finishing
    pub one_off_build_grace_hours: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            one_off_build_grace_hours: 24,
        }
    }
}

/// Local worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name recorded on containers and volumes
    pub name: String,

    /// Base resource types this worker provides
    pub base_resource_types: Vec<BaseResourceTypeConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            base_resource_types: vec![
                BaseResourceTypeConfig {
                    name: "git".to_string(),
                    image: "docker.io/concourse/git-resource".to_string(),
                    version: String::new(),
                },
                BaseResourceTypeConfig {
                    name: "registry-image".to_string(),
                    image: "docker.io/concourse/registry-image-resource".to_string(),
                    version: String::new(),
                },
                BaseResourceTypeConfig {
                    name: "time".to_string(),
                    image: "docker.io/concourse/time-resource".to_string(),
                    version: String::new(),
                },
            ],
        }
    }
}

/// A base resource type and the image implementing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResourceTypeConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub version: String,
}
