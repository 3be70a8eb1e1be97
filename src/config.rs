use crate::error::{Result, VadError};
use crate::sampler::{SamplerConfig, DEFAULT_CACHE_CAPACITY};
use crate::store::{BuilderConfig, VAD_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the shard files.
    pub store_dir: PathBuf,
    /// Flush pending shards every N parsed annotation lines.
    pub flush_every: usize,
    /// Sample rate of the annotation timestamps.
    pub reference_sample_rate: u32,
    /// Number of shards the sampler keeps in memory.
    pub cache_capacity: u64,
    pub target_sample_rate: u32,
    pub chunk_seconds: f64,
    pub max_chunks_per_file: usize,
    pub shuffle_chunks: bool,
    /// Restrict sampling to these language labels. Empty accepts all.
    pub desired_languages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./data/vad_shards"),
            flush_every: 10_000,
            reference_sample_rate: VAD_SAMPLE_RATE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            target_sample_rate: 16_000,
            chunk_seconds: 10.0,
            max_chunks_per_file: 16,
            shuffle_chunks: false,
            desired_languages: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Ignoring config file {}: {e}", path.display());
                Self::default()
            }),
            _ => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| VadError::Config(format!("{}: {e}", path.display())))
    }

    /// Override fields from `VADSHARD_*` variables. Unparseable values are ignored.
    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("VADSHARD_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(n) = var("VADSHARD_FLUSH_EVERY").and_then(|v| v.parse().ok()) {
            self.flush_every = n;
        }
        if let Some(n) = var("VADSHARD_CACHE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.cache_capacity = n;
        }
        if let Some(n) = var("VADSHARD_TARGET_SAMPLE_RATE").and_then(|v| v.parse().ok()) {
            self.target_sample_rate = n;
        }
        if let Some(n) = var("VADSHARD_CHUNK_SECONDS").and_then(|v| v.parse().ok()) {
            self.chunk_seconds = n;
        }
        if let Some(n) = var("VADSHARD_MAX_CHUNKS").and_then(|v| v.parse().ok()) {
            self.max_chunks_per_file = n;
        }
        if let Some(b) = var("VADSHARD_SHUFFLE").and_then(|v| parse_bool(&v)) {
            self.shuffle_chunks = b;
        }
        if let Some(langs) = var("VADSHARD_LANGUAGES") {
            self.desired_languages = parse_language_list(&langs);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_every == 0 {
            return Err(VadError::Config(
                "flush_every must be greater than 0".to_string(),
            ));
        }
        if self.reference_sample_rate == 0 || self.target_sample_rate == 0 {
            return Err(VadError::Config(
                "Sample rates must be greater than 0".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(VadError::Config(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }
        if !self.chunk_seconds.is_finite() || self.chunk_seconds <= 0.0 {
            return Err(VadError::Config(format!(
                "chunk_seconds must be a positive number, got {}",
                self.chunk_seconds
            )));
        }
        if self.max_chunks_per_file == 0 {
            return Err(VadError::Config(
                "max_chunks_per_file must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            flush_every: self.flush_every,
            reference_sample_rate: self.reference_sample_rate,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        let desired: BTreeSet<String> = self.desired_languages.iter().cloned().collect();
        SamplerConfig {
            desired_languages: (!desired.is_empty()).then_some(desired),
            target_sample_rate: self.target_sample_rate,
            chunk_duration: self.chunk_seconds,
            max_chunks_per_file: self.max_chunks_per_file,
            shuffle_chunks: self.shuffle_chunks,
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vadshard").join("config.toml"))
    }
}

/// Split a comma-separated language list, dropping blanks.
pub fn parse_language_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.flush_every, 10_000);
        assert_eq!(config.reference_sample_rate, 16_000);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.chunk_seconds, 10.0);
        assert_eq!(config.max_chunks_per_file, 16);
        assert!(!config.shuffle_chunks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VADSHARD_STORE_DIR", "/tmp/shards"),
            ("VADSHARD_FLUSH_EVERY", "500"),
            ("VADSHARD_CHUNK_SECONDS", "4.5"),
            ("VADSHARD_SHUFFLE", "yes"),
            ("VADSHARD_LANGUAGES", "es, fr,,ar"),
            ("VADSHARD_MAX_CHUNKS", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.store_dir, PathBuf::from("/tmp/shards"));
        assert_eq!(config.flush_every, 500);
        assert_eq!(config.chunk_seconds, 4.5);
        assert!(config.shuffle_chunks);
        assert_eq!(config.desired_languages, vec!["es", "fr", "ar"]);
        assert_eq!(config.max_chunks_per_file, 16);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "store_dir = \"/data/vad\"\nmax_chunks_per_file = 4\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/data/vad"));
        assert_eq!(config.max_chunks_per_file, 4);
        assert_eq!(config.flush_every, 10_000);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "flush_every = \"often\"").unwrap();

        assert!(matches!(Config::load_from(&path), Err(VadError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.chunk_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.flush_every = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chunk_seconds = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sampler_config() {
        let mut config = Config::default();
        assert!(config.sampler_config().desired_languages.is_none());

        config.desired_languages = vec!["es".to_string(), "fr".to_string()];
        let sampler = config.sampler_config();
        assert_eq!(sampler.desired_languages.as_ref().unwrap().len(), 2);
        assert_eq!(sampler.chunk_samples(), 160_000);
    }
}
