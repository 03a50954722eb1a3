//! Daemon path configuration
//!
//! The daemon works relative to three directories: the configuration file
//! or directory, the queue workspace and the run directory. Command line
//! flags take precedence; environment variables with the `LMAPD` prefix
//! override the compile-time defaults.

use anyhow::Result;
use serde::Deserialize;

/// Default paths of the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Configuration file, or directory whose *.xml files are merged
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Root of the queue workspace
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// Run directory holding the pid and status files
    #[serde(default = "default_run_path")]
    pub run_path: String,
}

fn default_config_path() -> String {
    "/etc/lmapd".to_string()
}

fn default_queue_path() -> String {
    "/var/lib/lmapd/queue".to_string()
}

fn default_run_path() -> String {
    "/var/run/lmapd".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            queue_path: default_queue_path(),
            run_path: default_run_path(),
        }
    }
}

impl DaemonConfig {
    /// Load defaults, letting `LMAPD_*` environment variables override.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("LMAPD"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.config_path, "/etc/lmapd");
        assert_eq!(config.queue_path, "/var/lib/lmapd/queue");
        assert_eq!(config.run_path, "/var/run/lmapd");
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("LMAPD_QUEUE_PATH", "/tmp/lmapd-test-queue");
        let config = DaemonConfig::load().unwrap();
        assert_eq!(config.queue_path, "/tmp/lmapd-test-queue");
        std::env::remove_var("LMAPD_QUEUE_PATH");
    }
}
