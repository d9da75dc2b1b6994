//! Pipeline configuration.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `EPISTREAM_CACHE_DIR` | Directory for frame cache artifacts |
//! | `EPISTREAM_DB` | SQLite database for chart documents and location rows |
//! | `EPISTREAM_STATS_BATCH` | Rows per location-stats insert transaction (default: 1000) |
//! | `EPISTREAM_CHUNK_BYTES` | Response body chunk size (default: 65536) |
//! | `EPISTREAM_HOTSPOT_FACTOR` | Spike multiplier for hotspot detection (default: 5) |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory holding `<run_id>.frames` cache artifacts.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// SQLite database path for the statistics store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Rows per bulk-insert transaction.
    #[serde(default = "default_stats_batch_size")]
    pub stats_batch_size: usize,

    /// Bytes buffered before a response chunk is handed to the consumer.
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Infected count must reach `factor * previous` to flag a hotspot.
    #[serde(default = "default_hotspot_factor")]
    pub hotspot_factor: u32,
}

fn base_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("epistream")
}

fn default_cache_dir() -> PathBuf {
    base_dir().join("frames")
}

fn default_db_path() -> PathBuf {
    base_dir().join("stats.db")
}

fn default_stats_batch_size() -> usize {
    1000
}

fn default_chunk_bytes() -> usize {
    64 * 1024
}

fn default_hotspot_factor() -> u32 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            stats_batch_size: default_stats_batch_size(),
            chunk_bytes: default_chunk_bytes(),
            hotspot_factor: default_hotspot_factor(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables, falling back to defaults.
    /// Unparsable or zero values are ignored, so the result always validates.
    pub fn from_env() -> Self {
        Self {
            cache_dir: std::env::var("EPISTREAM_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_dir()),
            db_path: std::env::var("EPISTREAM_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_db_path()),
            stats_batch_size: positive_env("EPISTREAM_STATS_BATCH").unwrap_or_else(default_stats_batch_size),
            chunk_bytes: positive_env("EPISTREAM_CHUNK_BYTES").unwrap_or_else(default_chunk_bytes),
            hotspot_factor: positive_env("EPISTREAM_HOTSPOT_FACTOR").unwrap_or_else(default_hotspot_factor),
        }
    }

    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| PipelineError::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or disable the pipeline.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.stats_batch_size == 0 {
            return Err(PipelineError::Config {
                message: "stats_batch_size must be at least 1".to_string(),
            });
        }
        if self.chunk_bytes == 0 {
            return Err(PipelineError::Config {
                message: "chunk_bytes must be at least 1".to_string(),
            });
        }
        if self.hotspot_factor == 0 {
            return Err(PipelineError::Config {
                message: "hotspot_factor must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Set the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the statistics database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the bulk-insert batch size.
    pub fn with_stats_batch_size(mut self, size: usize) -> Self {
        self.stats_batch_size = size;
        self
    }

    /// Set the response chunk size.
    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes;
        self
    }
}

fn positive_env<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + Default + PartialOrd,
{
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_from_env_overrides_and_ignores_garbage() {
        std::env::set_var("EPISTREAM_CACHE_DIR", "/srv/frames");
        std::env::set_var("EPISTREAM_STATS_BATCH", "250");
        std::env::set_var("EPISTREAM_CHUNK_BYTES", "not-a-number");

        let config = PipelineConfig::from_env();

        std::env::remove_var("EPISTREAM_CACHE_DIR");
        std::env::remove_var("EPISTREAM_STATS_BATCH");
        std::env::remove_var("EPISTREAM_CHUNK_BYTES");

        assert_eq!(config.cache_dir, PathBuf::from("/srv/frames"));
        assert_eq!(config.stats_batch_size, 250);
        assert_eq!(config.chunk_bytes, 64 * 1024);
        assert_eq!(config.hotspot_factor, 5);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_zero_values() {
        std::env::set_var("EPISTREAM_HOTSPOT_FACTOR", "0");
        std::env::set_var("EPISTREAM_STATS_BATCH", "0");

        let config = PipelineConfig::from_env();

        std::env::remove_var("EPISTREAM_HOTSPOT_FACTOR");
        std::env::remove_var("EPISTREAM_STATS_BATCH");

        assert_eq!(config.hotspot_factor, 5);
        assert_eq!(config.stats_batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_with_partial_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epistream.yaml");
        std::fs::write(&path, "cache_dir: /data/cache\nstats_batch_size: 10\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/data/cache"));
        assert_eq!(config.stats_batch_size, 10);
        assert_eq!(config.chunk_bytes, 64 * 1024);
    }

    #[test]
    fn test_load_rejects_zero_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epistream.yaml");
        std::fs::write(&path, "stats_batch_size: 0\n").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}
