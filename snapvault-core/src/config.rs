use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_STORE_DIR: &str = ".snapvault";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Store settings, read from `<store_dir>/config.toml` when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location, relative to the working root unless absolute.
    pub store_dir: String,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
    /// Number of files hashed and stored concurrently.
    pub batch_size: usize,
    /// Ignore file read from the working root.
    pub ignore_file: String,
    /// Extra patterns applied to every walk.
    pub ignore_patterns: Vec<String>,
    pub compression_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: DEFAULT_STORE_DIR.to_string(),
            max_file_size: 100 * 1024 * 1024,
            batch_size: 10,
            ignore_file: ".gitignore".to_string(),
            ignore_patterns: Vec::new(),
            compression_level: 3,
        }
    }
}

impl Config {
    /// Load a TOML config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.batch_size == 0 {
            config.batch_size = 1;
        }
        Ok(config)
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }
}
