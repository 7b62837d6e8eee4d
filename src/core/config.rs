//! Configuration management

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5000";
const DEFAULT_MODEL_PAIRS: &str = "en-fr";
const DEFAULT_MAX_TEXT_LENGTH: i64 = 512;
const DEFAULT_MAX_FILE_SIZE: i64 = 10 * 1024 * 1024;
const DEFAULT_TEMP_DIR: &str = "/tmp";

/// Optional settings file looked up in the working directory
const CONFIG_FILE_STEM: &str = "translator";

/// Service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Origins allowed by CORS; `*` mirrors any origin
    pub cors_origins: Vec<String>,
    /// Pair identifiers to load, in order
    pub model_pairs: Vec<String>,
    /// Directory holding one subdirectory per pair
    pub model_base_path: PathBuf,
    /// Token limit applied to every input
    pub max_text_length: usize,
    /// Largest accepted upload, in bytes
    pub max_file_size: usize,
    /// Where translated files are staged
    pub temp_dir: PathBuf,
}

/// Settings as they come out of the layered sources, lists still comma separated
#[derive(Debug, Deserialize)]
struct RawSettings {
    cors_origins: String,
    model_pairs: String,
    model_base_path: String,
    max_text_length: usize,
    max_file_size: usize,
    temp_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cors_origins: split_list(DEFAULT_CORS_ORIGINS),
            model_pairs: split_list(DEFAULT_MODEL_PAIRS),
            model_base_path: default_model_base_path(),
            max_text_length: DEFAULT_MAX_TEXT_LENGTH as usize,
            max_file_size: DEFAULT_MAX_FILE_SIZE as usize,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then `translator.{toml,json,yaml}` if present,
    /// then environment variables (`MODEL_PAIRS`, `MAX_FILE_SIZE`, ...)
    pub fn load() -> anyhow::Result<Self> {
        let builder = Self::defaults()?
            .add_source(File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(Environment::default().try_parsing(true));

        let config = Self::from_builder(builder)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder pre-populated with the built-in defaults
    pub fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
        let base_path = default_model_base_path().to_string_lossy().into_owned();

        Ok(config::Config::builder()
            .set_default("cors_origins", DEFAULT_CORS_ORIGINS)?
            .set_default("model_pairs", DEFAULT_MODEL_PAIRS)?
            .set_default("model_base_path", base_path)?
            .set_default("max_text_length", DEFAULT_MAX_TEXT_LENGTH)?
            .set_default("max_file_size", DEFAULT_MAX_FILE_SIZE)?
            .set_default("temp_dir", DEFAULT_TEMP_DIR)?)
    }

    /// Resolve a builder into a config, splitting list settings
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let raw: RawSettings = builder.build()?.try_deserialize()?;

        let config = Self {
            cors_origins: split_list(&raw.cors_origins),
            model_pairs: dedup_preserving_order(split_list(&raw.model_pairs)),
            model_base_path: PathBuf::from(raw.model_base_path),
            max_text_length: raw.max_text_length,
            max_file_size: raw.max_file_size,
            temp_dir: PathBuf::from(raw.temp_dir),
        };

        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_text_length == 0 {
            return Err(anyhow::anyhow!("MAX_TEXT_LENGTH must be greater than 0"));
        }

        if self.max_file_size == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE must be greater than 0"));
        }

        if self.model_pairs.is_empty() {
            return Err(anyhow::anyhow!("MODEL_PAIRS must name at least one language pair"));
        }

        if self.cors_origins.is_empty() {
            warn!("No CORS origins configured, browsers will be refused");
        }

        Ok(())
    }
}

/// Directory of the running executable, falling back to the working directory
fn default_model_base_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
