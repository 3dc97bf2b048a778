use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::Device;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_version")]
    pub version: f32,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_upload_bytes: usize,
    pub request_timeout_secs: u64,
    pub max_concurrent_inferences: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub device: DeviceChoice,
    pub image_size: u32,
    pub normalization: Normalization,
    pub classifier: ClassifierConfig,
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cpu,
    Cuda,
    #[default]
    Auto,
}

/// Memory layout the feature extractor consumes and produces.
///
/// Preprocessing always yields NHWC and the classifier was trained on
/// features flattened in NHWC order, so an `Nchw` extractor has its input
/// and output permuted around the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    #[default]
    Nchw,
}

/// How raw classifier scores become the reported probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Use scores as-is when they already form a distribution, softmax otherwise.
    #[default]
    Auto,
    Softmax,
    None,
}

fn default_version() -> f32 {
    1.0
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            workers: None,
            max_upload_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            max_concurrent_inferences: None,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            device: DeviceChoice::Auto,
            image_size: 180,
            normalization: Normalization::Auto,
            classifier: ClassifierConfig {
                path: PathBuf::from("models/skin_disease_classifier.pt"),
            },
            extractor: ExtractorConfig {
                path: PathBuf::from("models/vgg19_features.pt"),
                layout: TensorLayout::Nchw,
                url: None,
                sha256: None,
            },
        }
    }
}

impl DeviceChoice {
    pub fn resolve(self) -> Device {
        match self {
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
            DeviceChoice::Auto => Device::cuda_if_available(),
        }
    }
}

impl std::str::FromStr for DeviceChoice {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceChoice::Cpu),
            "cuda" | "gpu" => Ok(DeviceChoice::Cuda),
            "auto" => Ok(DeviceChoice::Auto),
            _ => Err(()),
        }
    }
}

impl ServiceConfig {
    /// Loads `config/service.yaml` (or `$SERVICE_CONFIG`) and applies
    /// environment overrides. A missing file falls back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SERVICE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut config = if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(&path)?
        } else {
            log::warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }
        if let Some(workers) = lookup("WORKERS") {
            self.server.workers = Some(parse_value("WORKERS", &workers)?);
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", &limit)?;
        }
        if let Some(timeout) = lookup("REQUEST_TIMEOUT_SECS") {
            self.server.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(permits) = lookup("MAX_CONCURRENT_INFERENCES") {
            self.server.max_concurrent_inferences =
                Some(parse_value("MAX_CONCURRENT_INFERENCES", &permits)?);
        }
        if let Some(device) = lookup("MODEL_DEVICE") {
            self.models.device = device.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MODEL_DEVICE",
                value: device.clone(),
            })?;
        }
        if let Some(path) = lookup("CLASSIFIER_MODEL_PATH") {
            self.models.classifier.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("EXTRACTOR_MODEL_PATH") {
            self.models.extractor.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("EXTRACTOR_MODEL_URL") {
            self.models.extractor.url = Some(url);
        }
        if let Some(digest) = lookup("EXTRACTOR_MODEL_SHA256") {
            self.models.extractor.sha256 = Some(digest);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.port",
                value: "0".into(),
            });
        }
        if self.models.image_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "models.image_size",
                value: "0".into(),
            });
        }
        if self.server.max_concurrent_inferences == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "server.max_concurrent_inferences",
                value: "0".into(),
            });
        }
        if self.server.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "server.workers",
                value: "0".into(),
            });
        }
        if let Some(digest) = &self.models.extractor.sha256 {
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(ConfigError::InvalidValue {
                    key: "models.extractor.sha256",
                    value: digest.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn inference_permits(&self) -> usize {
        self.server
            .max_concurrent_inferences
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn default_config_path() -> PathBuf {
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        PathBuf::from(format!("{}/../config/service.yaml", manifest_dir))
    } else {
        PathBuf::from("config/service.yaml")
    }
}
