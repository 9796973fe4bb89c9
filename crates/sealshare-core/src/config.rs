use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SealError, SealResult};

/// Default capacity of a file's authorized set.
pub const DEFAULT_MAX_AUTHORIZED: u32 = 100;

/// Everything `sealshare` reads from its TOML file. Absent sections and keys
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub ledger: LedgerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum number of principals authorized on one file (default: 100)
    pub max_authorized: u32,
    /// Ledger state file. `.json` selects the JSON store, anything else RocksDB.
    pub state_path: PathBuf,
    /// JSONL journal that every emitted event is appended to. Off unless set.
    pub event_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_authorized: DEFAULT_MAX_AUTHORIZED,
            state_path: PathBuf::from("~/.local/share/sealshare/ledger.json"),
            event_log: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> SealResult<()> {
        if self.max_authorized == 0 {
            return Err(SealError::Config(
                "ledger.max_authorized must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl SealConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(content: &str) -> SealResult<Self> {
        let config: SealConfig =
            toml::from_str(content).map_err(|e| SealError::Config(e.to_string()))?;
        config.ledger.validate()?;
        Ok(config)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
