use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::{ExportFormat, OggSettings};
use crate::synthesis::{TalkSettings, DEFAULT_SAMPLE_GRANULARITY};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub talk: TalkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkConfig {
    #[serde(default = "default_sample_granularity")]
    pub sample_granularity: usize,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub export_audio: bool,
    #[serde(default)]
    pub export_format: ExportFormat,
    #[serde(default = "default_ogg_quality")]
    pub ogg_quality: f32,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    #[serde(default)]
    pub logging: bool,
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self {
            sample_granularity: default_sample_granularity(),
            use_cache: true,
            export_audio: false,
            export_format: ExportFormat::default(),
            ogg_quality: default_ogg_quality(),
            export_dir: default_export_dir(),
            logging: false,
        }
    }
}

impl TalkConfig {
    pub fn settings(&self) -> TalkSettings {
        TalkSettings {
            sample_granularity: self.sample_granularity,
            use_cache: self.use_cache,
            export_audio: self.export_audio,
            export_format: self.export_format,
            ogg: OggSettings::new(self.ogg_quality),
            logging: self.logging,
        }
    }

    /// Directory exported talks are written to and looked up in
    pub fn cache_dir(&self) -> PathBuf {
        crate::paths::get_cache_dir(&self.export_dir)
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_sample_granularity() -> usize {
    DEFAULT_SAMPLE_GRANULARITY
}

fn default_true() -> bool {
    true
}

fn default_ogg_quality() -> f32 {
    1.0
}

fn default_export_dir() -> String {
    "RemoteTalkAssets".to_string()
}

impl Config {
    /// Reads the configuration file, or returns defaults when there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&crate::paths::get_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}
