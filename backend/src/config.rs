use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "DEEPTRUST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/deeptrust.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub face: FaceConfig,
    pub video: VideoConfig,
    pub explain: ExplainConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let cors_origins = [5173, 3000, 8080]
            .iter()
            .flat_map(|port| {
                [
                    format!("http://localhost:{}", port),
                    format!("http://127.0.0.1:{}", port),
                ]
            })
            .collect();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins,
            max_upload_bytes: 50 * 1024 * 1024,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub classifier_path: PathBuf,
    pub face_model_path: PathBuf,
    pub use_cuda: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("models/best_efficientnet_b0.pt"),
            face_model_path: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            use_cuda: true,
        }
    }
}

/// Tuning for the SeetaFace cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub sample_frames: usize,
    pub max_sample_frames: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            sample_frames: 5,
            max_sample_frames: 10,
        }
    }
}

impl VideoConfig {
    /// Requested frame count, defaulted and clamped to `[1, max_sample_frames]`.
    pub fn frames_wanted(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.sample_frames)
            .clamp(1, self.max_sample_frames.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaliencyKind {
    Occlusion,
    Gradient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub enabled: bool,
    pub engine: SaliencyKind,
    pub occlusion_patch: u32,
    pub occlusion_stride: u32,
    /// Weight of the source image in the overlay blend.
    pub image_weight: f32,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: SaliencyKind::Occlusion,
            occlusion_patch: 32,
            occlusion_stride: 16,
            image_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub temp_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp"),
            results_dir: PathBuf::from("results"),
        }
    }
}

impl PipelineConfig {
    /// Loads the YAML file named by `DEEPTRUST_CONFIG` (or the default path),
    /// then applies environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { key: "PORT", value: port })?;
        }
        if let Some(path) = lookup("DEEPTRUST_CLASSIFIER_PATH") {
            self.model.classifier_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("DEEPTRUST_FACE_MODEL_PATH") {
            self.model.face_model_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("DEEPTRUST_RESULTS_DIR") {
            self.storage.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DEEPTRUST_TEMP_DIR") {
            self.storage.temp_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
