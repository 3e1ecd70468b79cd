//! Node configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/lanlog/config.toml, or `LANLOG_CONFIG`)
//! 3. Environment variables (`LANLOG_*` prefix)
//!
//! Environment variables take precedence over config file values.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lanlog_core::{DeviceId, UserId};
use lanlog_sync::transport::udp::{DEFAULT_GROUP, DEFAULT_PORT};
use lanlog_sync::{LocalIdentity, SyncConfig};

use crate::error::{NodeError, Result};

/// Environment variable prefix
const ENV_PREFIX: &str = "LANLOG";

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Who is writing.
    pub user_id: String,
    /// This installation. Must be unique on the network and stable across runs.
    pub device_id: String,
    /// Multicast group and port shared by every device.
    pub multicast_group: SocketAddrV4,
    /// Local interface to join the group on. Unspecified lets the OS pick.
    pub interface: Ipv4Addr,
    /// SQLite database. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Delay before stopping after the network goes away, in milliseconds.
    pub stop_delay_ms: u64,
    /// Delay before starting after the network comes back, in milliseconds.
    pub start_delay_ms: u64,
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            device_id: DeviceId::random().to_string(),
            multicast_group: SocketAddrV4::new(DEFAULT_GROUP, DEFAULT_PORT),
            interface: Ipv4Addr::UNSPECIFIED,
            database: Some(default_database_path()),
            stop_delay_ms: 1_000,
            start_delay_ms: 3_000,
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from the default location and environment.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`NodeConfig::load_from_path`], but writes the defaults to `path`
    /// when it does not exist yet, so the generated device id survives restarts.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let defaults = Self::default();
            defaults.save_to(path)?;
            tracing::info!(path = %path.display(), device = %defaults.device_id, "wrote new config");
        }
        Self::load_from_path(path)
    }

    /// Load configuration from a TOML string (useful for testing).
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let mut config: NodeConfig = toml::from_str(toml_content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_USER_ID")) {
            self.user_id = val;
        }

        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_DEVICE_ID")) {
            self.device_id = val;
        }

        // Empty means in-memory.
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_DATABASE")) {
            self.database = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_MULTICAST_GROUP")) {
            self.multicast_group = val.parse().map_err(|_| {
                NodeError::Config(format!("{ENV_PREFIX}_MULTICAST_GROUP is not ip:port: {val}"))
            })?;
        }

        Ok(())
    }

    /// Check the values that have no safe fallback.
    pub fn validate(&self) -> Result<()> {
        UserId::new(self.user_id.as_str())?;
        DeviceId::new(self.device_id.as_str())?;
        if !self.multicast_group.ip().is_multicast() {
            return Err(NodeError::Config(format!(
                "{} is not a multicast address",
                self.multicast_group.ip()
            )));
        }
        if self.sync.sync_window == 0 {
            return Err(NodeError::Config("sync.sync_window must be at least 1".into()));
        }
        Ok(())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the config file path.
    ///
    /// Can be overridden with the `LANLOG_CONFIG` environment variable.
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanlog")
            .join("config.toml")
    }

    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity::new(self.user_id.as_str(), self.device_id.as_str())
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

fn default_user_id() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Get the default database path.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanlog")
        .join("lanlog.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "LANLOG_USER_ID",
        "LANLOG_DEVICE_ID",
        "LANLOG_DATABASE",
        "LANLOG_MULTICAST_GROUP",
    ];

    /// Locks env access and restores the variables on drop
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = VARS
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in VARS {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _guard = EnvGuard::new();
        let config = NodeConfig::default();
        assert_eq!(config.multicast_group.to_string(), "235.1.1.0:4450");
        assert_eq!(config.stop_delay(), Duration::from_secs(1));
        assert_eq!(config.start_delay(), Duration::from_secs(3));
        assert_eq!(config.sync.round_window(), Duration::from_secs(5));
        assert_eq!(config.sync.sync_window, 100);
        assert_eq!(config.device_id.len(), 16);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_fills_missing_fields() {
        let _guard = EnvGuard::new();
        let config = NodeConfig::from_toml_str(
            r#"
            user_id = "alice"
            device_id = "alice-laptop"
            multicast_group = "239.0.0.7:5000"

            [sync]
            sync_window = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.user_id, "alice");
        assert_eq!(config.identity().log_id().device_id.as_str(), "alice-laptop");
        assert_eq!(config.multicast_group.port(), 5000);
        assert_eq!(config.sync.sync_window, 10);
        assert_eq!(config.sync.max_records_per_message, 25);
        assert_eq!(config.start_delay_ms, 3_000);
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = EnvGuard::new();
        env::set_var("LANLOG_USER_ID", "bob");
        env::set_var("LANLOG_DATABASE", "");

        let config = NodeConfig::from_toml_str("user_id = \"alice\"\ndevice_id = \"d1\"").unwrap();
        assert_eq!(config.user_id, "bob");
        assert_eq!(config.database, None);
    }

    #[test]
    fn test_bad_group_rejected() {
        let _guard = EnvGuard::new();
        env::set_var("LANLOG_MULTICAST_GROUP", "nonsense");
        assert!(matches!(
            NodeConfig::from_toml_str("device_id = \"d1\""),
            Err(NodeError::Config(_))
        ));

        env::set_var("LANLOG_MULTICAST_GROUP", "10.0.0.1:4450");
        assert!(matches!(
            NodeConfig::from_toml_str("device_id = \"d1\""),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn test_empty_identity_rejected() {
        let _guard = EnvGuard::new();
        assert!(NodeConfig::from_toml_str("user_id = \"\"").is_err());
    }

    #[test]
    fn test_load_or_init_persists_device_id() {
        let _guard = EnvGuard::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let first = NodeConfig::load_or_init(&path).unwrap();
        let second = NodeConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first, second);
    }
}
