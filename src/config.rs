use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::directory;

pub const DEFAULT_MAX_ROWS: u64 = 1000;
pub const DEFAULT_LIMIT: u64 = 1000;

/// Limits and engine settings for the query guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Hard ceiling on rows returned by one page.
    pub max_rows: u64,
    /// Page size used when the caller asks for none or too many.
    pub default_limit: u64,
    pub query_timeout_secs: Option<u64>,
    pub engine_path: Option<PathBuf>,
    /// Run `LOAD postgres` / `LOAD mysql` before attaching.
    pub load_extensions: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            default_limit: DEFAULT_LIMIT,
            query_timeout_secs: None,
            engine_path: None,
            load_extensions: false,
        }
    }
}

impl GuardConfig {
    /// Defaults, then `~/.sqlgate/config.json`, then `SQLGATE_*` variables.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        let path = directory::config_file_path();
        let mut config = if path.exists() {
            Self::from_file(&path).unwrap_or_else(|e| {
                warn!("Failed to read {}: {}, using defaults", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        };
        config.apply_lookup(|key| std::env::var(key).ok());
        let config = config.normalized();
        info!(
            "Guard config: max_rows={}, default_limit={}, timeout={:?}, engine_path={:?}",
            config.max_rows, config.default_limit, config.query_timeout_secs, config.engine_path
        );
        config
    }

    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: GuardConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Overlay values found through `lookup`; unparsable values are ignored.
    pub fn apply_lookup<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SQLGATE_MAX_ROWS") {
            match v.parse() {
                Ok(n) => self.max_rows = n,
                Err(_) => warn!("SQLGATE_MAX_ROWS is not a number: {}", v),
            }
        }
        if let Some(v) = get("SQLGATE_DEFAULT_LIMIT") {
            match v.parse() {
                Ok(n) => self.default_limit = n,
                Err(_) => warn!("SQLGATE_DEFAULT_LIMIT is not a number: {}", v),
            }
        }
        if let Some(v) = get("SQLGATE_QUERY_TIMEOUT_SECS") {
            match v.parse() {
                Ok(0) => self.query_timeout_secs = None,
                Ok(n) => self.query_timeout_secs = Some(n),
                Err(_) => warn!("SQLGATE_QUERY_TIMEOUT_SECS is not a number: {}", v),
            }
        }
        if let Some(v) = get("SQLGATE_ENGINE_PATH") {
            self.engine_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SQLGATE_LOAD_EXTENSIONS") {
            self.load_extensions = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Zero ceilings fall back to defaults; the default page never exceeds the ceiling.
    pub fn normalized(mut self) -> Self {
        if self.max_rows == 0 {
            self.max_rows = DEFAULT_MAX_ROWS;
        }
        if self.default_limit == 0 {
            self.default_limit = DEFAULT_LIMIT;
        }
        self.default_limit = self.default_limit.min(self.max_rows);
        if self.query_timeout_secs == Some(0) {
            self.query_timeout_secs = None;
        }
        self
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}
