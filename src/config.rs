//! Configuration for station-progress

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("station-progress")
}

/// Persistence medium for the progress document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sled,
    Json,
    Memory,
}

/// What to do when a certificate is requested for a path that already has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificatePolicy {
    /// Issue a new, independent certificate every time
    Append,
    /// Hand back the newest certificate already issued for the path
    Reuse,
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the progress document and catalog
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Key (sled) or file stem (json) of the progress document
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Catalog TOML; defaults to `<storage_dir>/catalog.toml`
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Refuse progress updates on locked sections
    #[serde(default = "default_true")]
    pub enforce_locks: bool,

    #[serde(default = "default_certificate_policy")]
    pub certificate_policy: CertificatePolicy,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sled
}

fn default_storage_key() -> String {
    "satoshi-station-progress".to_string()
}

fn default_true() -> bool {
    true
}

fn default_certificate_policy() -> CertificatePolicy {
    CertificatePolicy::Append
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: default_backend(),
            storage_key: default_storage_key(),
            catalog_path: None,
            enforce_locks: true,
            certificate_policy: CertificatePolicy::Append,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// sled database directory
    pub fn progress_db_path(&self) -> PathBuf {
        self.storage_dir.join("progress.sled")
    }

    /// JSON document path
    pub fn progress_json_path(&self) -> PathBuf {
        self.storage_dir.join(format!("{}.json", self.storage_key))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("catalog.toml"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
