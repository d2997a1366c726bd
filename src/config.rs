//! Startup configuration.
//!
//! Intentionally thin: full CLI ergonomics (flag parsing, subcommands,
//! interactive prompts) are an external collaborator per the spec's
//! non-goals. This just loads and validates a TOML file, with environment
//! overrides layered on top the way `config` is used elsewhere in the wider
//! retrieval pack (the teacher app keeps its settings in SQLite behind a GUI,
//! which doesn't fit a headless binary).

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Name of the environment variable pointing at the config file.
pub const CONFIG_PATH_ENV: &str = "CLOUDFRAME_CONFIG";
/// Prefix for environment-variable overrides (e.g. `CLOUDFRAME_MAX_CACHE_SIZE_MB`).
const ENV_PREFIX: &str = "CLOUDFRAME";

#[derive(Debug, Clone, Deserialize)]
pub struct FolderSpecConfig {
    /// `None` means the provider's root folder.
    pub id: Option<String>,
    /// -1 = unbounded, 0 = folder itself only, N>0 = descend N levels.
    pub depth: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub folders: Vec<FolderSpecConfig>,
    /// Provider-specific base URL override (mainly useful for self-hosted
    /// personal-cloud instances and for tests).
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    DriveFolder,
    PersonalCloud,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub provider: ProviderKind,
    pub provider_config: ProviderConfig,

    #[serde(default = "defaults::update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "defaults::scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "defaults::cache_tick_interval_ms")]
    pub cache_tick_interval_ms: u64,

    #[serde(default = "defaults::max_cache_size_mb")]
    pub max_cache_size_mb: u64,
    #[serde(default = "defaults::prefetch_batch_size")]
    pub prefetch_batch_size: usize,

    #[serde(default = "defaults::show_width")]
    pub show_width: u32,
    #[serde(default = "defaults::show_height")]
    pub show_height: u32,
    #[serde(default = "defaults::jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default)]
    pub use_blob_storage: bool,
    #[serde(default = "defaults::cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "defaults::store_path")]
    pub store_path: PathBuf,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

mod defaults {
    use std::path::PathBuf;

    pub fn update_interval_ms() -> u64 {
        60_000
    }
    pub fn scan_interval_ms() -> u64 {
        6 * 60 * 60 * 1000
    }
    pub fn cache_tick_interval_ms() -> u64 {
        30_000
    }
    pub fn max_cache_size_mb() -> u64 {
        200
    }
    pub fn prefetch_batch_size() -> usize {
        5
    }
    pub fn show_width() -> u32 {
        1920
    }
    pub fn show_height() -> u32 {
        1080
    }
    pub fn jpeg_quality() -> u8 {
        90
    }
    pub fn cache_path() -> PathBuf {
        PathBuf::from("./cache")
    }
    pub fn store_path() -> PathBuf {
        PathBuf::from("./cloudframe.db")
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
}

impl Config {
    /// Load from the path named by `CLOUDFRAME_CONFIG` (default `config.toml`),
    /// then apply `CLOUDFRAME_*` environment overrides, then validate.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> CoreResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let raw = builder
            .build()
            .map_err(|e| CoreError::Configuration(e.to_string()))?;

        let cfg: Config = raw
            .try_deserialize()
            .map_err(|e| CoreError::Configuration(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(CoreError::Configuration(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.prefetch_batch_size == 0 {
            return Err(CoreError::Configuration(
                "prefetch_batch_size must be >= 1".to_string(),
            ));
        }
        if self.provider_config.folders.is_empty() {
            return Err(CoreError::Configuration(
                "provider_config.folders must list at least one folder".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb * 1024 * 1024
    }
}
