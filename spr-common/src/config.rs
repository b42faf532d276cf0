//! Configuration loading and root folder resolution

use crate::time::Granularity;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides the root folder
pub const ROOT_ENV_VAR: &str = "SPR_ROOT";

/// Database file name inside the root folder
pub const DEFAULT_DB_FILE: &str = "spr.db";

/// Pipeline configuration loaded from TOML
///
/// Every field has a default so a missing or partial file still yields a
/// usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root folder for the database and auxiliary files
    pub root_folder: Option<PathBuf>,
    /// Explicit database path; defaults to `<root>/spr.db`
    pub database_path: Option<PathBuf>,
    /// SQLite busy_timeout applied to every connection
    pub busy_timeout_ms: u64,
    /// Total time a write may spend retrying on a locked database
    pub max_lock_wait_ms: u64,
    pub pool_max_connections: u32,
    /// Records staged between progress reports
    pub batch_size: usize,
    /// Age after which a `running` run is reported as stale
    pub stale_run_after_secs: u64,
    /// WAL size that triggers a checkpoint during maintenance
    pub wal_checkpoint_threshold_bytes: u64,
    /// Source priority file (TOML, `[[source]]` entries)
    pub priorities_path: Option<PathBuf>,
    /// Resolve touched keys at the end of each ingestion run
    pub resolve_after_ingest: bool,
    /// Granularity used when the caller does not name one
    pub default_granularity: Granularity,
    /// Per-source age in days of the newest observation before it is reported stale
    pub freshness_max_days: BTreeMap<String, u64>,
    /// Run success rate (percent) below which a source is reported
    pub min_success_rate_pct: f64,
    /// Average run duration above which a source is reported slow
    pub slow_run_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            busy_timeout_ms: 8000,
            max_lock_wait_ms: 8000,
            pool_max_connections: 8,
            batch_size: 1000,
            stale_run_after_secs: 3600,
            wal_checkpoint_threshold_bytes: 64 * 1024 * 1024,
            priorities_path: None,
            resolve_after_ingest: true,
            default_granularity: Granularity::Daily,
            // Publication cadence of each source
            freshness_max_days: BTreeMap::from([
                ("CEPEA".to_string(), 1),
                ("CLIMA".to_string(), 2),
                ("IMEA".to_string(), 7),
            ]),
            min_success_rate_pct: 90.0,
            slow_run_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config location, or defaults if none exists
    pub fn load_default_location() -> Result<Self> {
        match locate_config_file() {
            Some(path) => Self::load(&path),
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values that would make the pipeline hang or spin
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(Error::Config("busy_timeout_ms must be greater than 0".to_string()));
        }
        if self.max_lock_wait_ms == 0 {
            return Err(Error::Config("max_lock_wait_ms must be greater than 0".to_string()));
        }
        if self.pool_max_connections == 0 {
            return Err(Error::Config("pool_max_connections must be greater than 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.min_success_rate_pct) {
            return Err(Error::Config("min_success_rate_pct must be between 0 and 100".to_string()));
        }
        Ok(())
    }

    /// Database path: explicit setting first, then `<root>/spr.db`
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join(DEFAULT_DB_FILE))
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, config: &PipelineConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root) = &config.root_folder {
        return root.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Platform config file location, if one exists
fn locate_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("spr").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/spr/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("spr"))
        .unwrap_or_else(|| PathBuf::from("./spr_data"))
}
