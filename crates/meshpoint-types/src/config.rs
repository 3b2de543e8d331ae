//! Runtime configuration with sensible defaults.
//!
//! All operational parameters of the core are centralized here. Every
//! value has a documented default; the daemon merges a JSON config
//! file and CLI flags on top.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{MeshpointError, Result};

/// Default period between cycle-metric reports, in seconds.
pub const DEFAULT_REPORT_METRICS_PERIOD_SECS: u64 = 60;

/// Default schedule sweeper tick, in seconds.
pub const DEFAULT_SCHEDULE_TICK_SECS: u64 = 5;

/// Core runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem path for the persistent store.
    pub data_dir: PathBuf,

    /// Broker connection string. The core broker is in-process; the
    /// value is recorded for upstream replication and logging.
    pub server: String,

    /// Shared secret required on privileged subjects.
    pub auth_token: String,

    /// Seconds between cycle-metric point reports to the root node.
    pub report_metrics_period_secs: u64,

    /// Seconds between schedule sweeper passes over the tree.
    pub schedule_tick_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("meshpoint-data"),
            server: String::new(),
            auth_token: String::new(),
            report_metrics_period_secs: DEFAULT_REPORT_METRICS_PERIOD_SECS,
            schedule_tick_secs: DEFAULT_SCHEDULE_TICK_SECS,
        }
    }
}

impl AppConfig {
    /// Validates all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(MeshpointError::Config {
                reason: "data_dir must not be empty".into(),
            });
        }

        if self.report_metrics_period_secs == 0 {
            return Err(MeshpointError::Config {
                reason: "report_metrics_period_secs must be greater than 0".into(),
            });
        }

        if self.schedule_tick_secs == 0 {
            return Err(MeshpointError::Config {
                reason: "schedule_tick_secs must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
