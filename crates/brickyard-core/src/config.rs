use crate::CoreError;
use brickyard_executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server settings loaded from a TOML file.
///
/// ```toml
/// port = 8080
/// db = "/var/lib/brickyard/brickyard.db"
/// backup_file = "/var/lib/brickyard/backup.json"
/// operation_retention_secs = 3600
///
/// [executor]
/// backend = "ssh"
///
/// [executor.ssh]
/// user = "root"
/// keyfile = "/etc/brickyard/id_rsa"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub db: PathBuf,
    /// Request-handling threads.
    pub workers: usize,
    /// Exported after every successful mutation when set.
    pub backup_file: Option<PathBuf>,
    /// Seconds a finished operation waits to be polled before it is dropped.
    pub operation_retention_secs: u64,
    pub executor: ExecutorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db: PathBuf::from("brickyard.db"),
            workers: 4,
            backup_file: None,
            operation_retention_secs: crate::operations::DEFAULT_RETENTION.as_secs(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers == 0 {
            return Err(CoreError::Config("workers must be at least 1".to_owned()));
        }
        if self.db.as_os_str().is_empty() {
            return Err(CoreError::Config("db path must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Lock file guarding the database against a second instance.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.db.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}
