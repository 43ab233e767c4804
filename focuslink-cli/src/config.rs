//! Configuration file support for focuslink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FOCUSLINK_*)
//! 3. Local config file (./focuslink.toml)
//! 4. Global config file (~/.config/focuslink/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyACM0"
//! baud = 9600
//! timeout_ms = 30000
//! pacing_ms = 250
//! write_strategy = "auto"
//!
//! [backup]
//! directory = "~/keyboard-backups"
//! ```

use directories::ProjectDirs;
use focuslink::WriteStrategy;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the per-directory config file.
const LOCAL_CONFIG: &str = "focuslink.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Response idle timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Delay before each request in milliseconds.
    pub pacing_ms: Option<u64>,
    /// Request writer: "auto", "direct" or "chunked".
    pub write_strategy: Option<WriteStrategy>,
}

/// Backup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Where `backup` writes when no output file is given.
    pub directory: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Backup configuration.
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the implicit files, an explicitly named file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let config = Self::read_file(path).map_err(CliError::Config)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an optional config file, warning if it exists but is unusable.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match Self::read_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("{e}");
                None
            },
        }
    }

    fn read_file(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "focuslink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let connection = other.connection;
        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.timeout_ms.is_some() {
            self.connection.timeout_ms = connection.timeout_ms;
        }
        if connection.pacing_ms.is_some() {
            self.connection.pacing_ms = connection.pacing_ms;
        }
        if connection.write_strategy.is_some() {
            self.connection.write_strategy = connection.write_strategy;
        }

        if other.backup.directory.is_some() {
            self.backup.directory = other.backup.directory;
        }
    }

    /// Remember `port` as the preferred serial port.
    ///
    /// Written to the local file if one exists, otherwise to the global one.
    /// Other settings in the target file are preserved.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<()> {
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        self.connection.port = Some(port.to_string());
        Self::store_port(&path, port)?;
        info!("Saved port {port} to {}", path.display());

        Ok(())
    }

    fn store_port(path: &Path, port: &str) -> anyhow::Result<()> {
        let mut stored = if path.exists() {
            Self::read_file(path).map_err(anyhow::Error::msg)?
        } else {
            Self::default()
        };
        stored.connection.port = Some(port.to_string());

        let content = toml::to_string_pretty(&stored)?;
        fs::write(path, content)?;
        Ok(())
    }
}
