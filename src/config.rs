//! Application configuration loaded from TOML.
//!
//! The loaded [`AppConfig`] is passed explicitly to the vision client, the
//! persistence orchestrator and the monitor loop.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzer::catalog::{default_required, EquipmentId};
use crate::analyzer::image_prep::DEFAULT_MAX_UPLOAD_BYTES;
use crate::analyzer::types::ResponseFormat;
use crate::error::PpeError;

const APP_DIR: &str = "ppe-monitor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub vision: VisionConfig,
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    /// Catalog tokens (or English names) that make up a compliant outfit
    pub required_equipment: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub model: String,
    pub format: ResponseFormat,
    /// Replaces the built-in prompt when set
    pub custom_prompt: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between automatic frame analyses
    pub interval_secs: u64,
    /// Minimum overall confidence for an automatic capture
    pub min_confidence: f64,
    pub alerts_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL of the hosted storage/database project. None keeps everything local.
    pub url: Option<String>,
    pub bucket: String,
    pub table: String,
    /// Directory for the local fallback store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vision: VisionConfig::default(),
            monitor: MonitorConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            required_equipment: default_required()
                .iter()
                .map(|id| id.token().to_string())
                .collect(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://ai.gateway.lovable.dev/v1/chat/completions".to_string(),
            model: "google/gemini-2.5-flash".to_string(),
            format: ResponseFormat::Simple,
            custom_prompt: None,
            timeout_secs: 60,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            min_confidence: 0.7,
            alerts_enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            bucket: "epp-images".to_string(),
            table: "captured_images".to_string(),
            data_dir: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, PpeError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| PpeError::Config(format!("failed to read {:?}: {}", path, e)))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, PpeError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| PpeError::Config(format!("invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PpeError> {
        if self.monitor.interval_secs == 0 {
            return Err(PpeError::Config(
                "monitor.interval_secs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitor.min_confidence) {
            return Err(PpeError::Config(format!(
                "monitor.min_confidence must be within 0..1, got {}",
                self.monitor.min_confidence
            )));
        }
        if self.vision.timeout_secs == 0 {
            return Err(PpeError::Config(
                "vision.timeout_secs must be at least 1".to_string(),
            ));
        }
        self.required_set()?;
        Ok(())
    }

    /// Resolve `required_equipment` against the catalog.
    pub fn required_set(&self) -> Result<BTreeSet<EquipmentId>, PpeError> {
        let mut set = BTreeSet::new();
        for token in &self.required_equipment {
            let id = EquipmentId::from_token(token).ok_or_else(|| {
                PpeError::Config(format!("unknown equipment '{}' in required_equipment", token))
            })?;
            set.insert(id);
        }
        if set.is_empty() {
            return Err(PpeError::Config(
                "required_equipment must name at least one item".to_string(),
            ));
        }
        Ok(set)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir().join("local_store.db")
    }
}

/// `<config_dir>/ppe-monitor/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}
