use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::ClassFilter;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
const DEFAULT_REPORT_NAME: &str = "report.xlsx";
const DEFAULT_JSON_HISTORY_PATH: &str = "history.json";
const DEFAULT_SQLITE_HISTORY_PATH: &str = "history.db";
const DEFAULT_MODEL_PATH: &str = "best_truck.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.005;
const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_MEDIA_DEADLINE_SECS: u64 = 600;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    history: Option<HistoryConfigFile>,
    model: Option<ModelConfigFile>,
    limits: Option<LimitsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    classes: Option<Vec<u32>>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
    scripted_counts: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct LimitsConfigFile {
    max_upload_bytes: Option<usize>,
    media_deadline_secs: Option<u64>,
    stream_timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryBackend {
    Json,
    Sqlite,
}

impl HistoryBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(anyhow!("unknown history backend '{}'", other)),
        }
    }

    fn default_path(self) -> &'static str {
        match self {
            Self::Json => DEFAULT_JSON_HISTORY_PATH,
            Self::Sqlite => DEFAULT_SQLITE_HISTORY_PATH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Tract,
    Scripted,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "scripted" => Ok(Self::Scripted),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_addr: String,
    pub upload_dir: PathBuf,
    pub report_path: PathBuf,
    pub history: HistorySettings,
    pub model: ModelSettings,
    pub limits: Limits,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub backend: HistoryBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: BackendKind,
    pub path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub classes: Vec<u32>,
    pub confidence: f32,
    pub iou_threshold: f32,
    /// Per-call truck counts replayed by the scripted backend.
    pub scripted_counts: Vec<usize>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tract,
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            classes: vec![ClassFilter::TRUCK],
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            scripted_counts: Vec::new(),
        }
    }
}

impl ModelSettings {
    pub fn class_filter(&self) -> Result<ClassFilter> {
        ClassFilter::new(self.classes.iter().copied())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_upload_bytes: usize,
    /// Wall-clock budget for one video.
    pub media_deadline: Duration,
    /// Open/read timeout for network streams.
    pub stream_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            media_deadline: Duration::from_secs(DEFAULT_MEDIA_DEADLINE_SECS),
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let upload_dir = PathBuf::from(DEFAULT_UPLOAD_DIR);
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            report_path: upload_dir.join(DEFAULT_REPORT_NAME),
            upload_dir,
            history: HistorySettings {
                backend: HistoryBackend::Json,
                path: PathBuf::from(DEFAULT_JSON_HISTORY_PATH),
            },
            model: ModelSettings::default(),
            limits: Limits::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `TRUCK_CONFIG` (if set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRUCK_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`ServerConfig::load`], with an explicit config file path.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or(defaults.api_addr);

        let storage = file.storage.unwrap_or_default();
        let upload_dir = storage.upload_dir.unwrap_or(defaults.upload_dir);
        let report_path = storage
            .report_path
            .unwrap_or_else(|| upload_dir.join(DEFAULT_REPORT_NAME));

        let history_file = file.history.unwrap_or_default();
        let history_backend = match history_file.backend.as_deref() {
            Some(value) => HistoryBackend::parse(value)?,
            None => HistoryBackend::Json,
        };
        let history = HistorySettings {
            backend: history_backend,
            path: history_file
                .path
                .unwrap_or_else(|| PathBuf::from(history_backend.default_path())),
        };

        let model_file = file.model.unwrap_or_default();
        let model_defaults = defaults.model;
        let model = ModelSettings {
            backend: match model_file.backend.as_deref() {
                Some(value) => BackendKind::parse(value)?,
                None => model_defaults.backend,
            },
            path: model_file.path.unwrap_or(model_defaults.path),
            input_width: model_file.input_width.unwrap_or(model_defaults.input_width),
            input_height: model_file
                .input_height
                .unwrap_or(model_defaults.input_height),
            classes: model_file.classes.unwrap_or(model_defaults.classes),
            confidence: model_file.confidence.unwrap_or(model_defaults.confidence),
            iou_threshold: model_file
                .iou_threshold
                .unwrap_or(model_defaults.iou_threshold),
            scripted_counts: model_file
                .scripted_counts
                .unwrap_or(model_defaults.scripted_counts),
        };

        let limits_file = file.limits.unwrap_or_default();
        let limits = Limits {
            max_upload_bytes: limits_file
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            media_deadline: Duration::from_secs(
                limits_file
                    .media_deadline_secs
                    .unwrap_or(DEFAULT_MEDIA_DEADLINE_SECS),
            ),
            stream_timeout: Duration::from_secs(
                limits_file
                    .stream_timeout_secs
                    .unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS),
            ),
        };

        Ok(Self {
            api_addr,
            upload_dir,
            report_path,
            history,
            model,
            limits,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TRUCK_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("TRUCK_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                let follows_upload_dir =
                    self.report_path == self.upload_dir.join(DEFAULT_REPORT_NAME);
                self.upload_dir = PathBuf::from(dir);
                if follows_upload_dir {
                    self.report_path = self.upload_dir.join(DEFAULT_REPORT_NAME);
                }
            }
        }
        if let Ok(backend) = std::env::var("TRUCK_HISTORY_BACKEND") {
            if !backend.trim().is_empty() {
                let parsed = HistoryBackend::parse(&backend)?;
                if self.history.path == Path::new(self.history.backend.default_path()) {
                    self.history.path = PathBuf::from(parsed.default_path());
                }
                self.history.backend = parsed;
            }
        }
        if let Ok(path) = std::env::var("TRUCK_HISTORY_PATH") {
            if !path.trim().is_empty() {
                self.history.path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("TRUCK_MODEL_BACKEND") {
            if !backend.trim().is_empty() {
                self.model.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("TRUCK_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(classes) = std::env::var("TRUCK_CLASSES") {
            let parsed = split_csv(&classes)
                .iter()
                .map(|entry| entry.parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| anyhow!("TRUCK_CLASSES must be a comma-separated list of class ids"))?;
            if !parsed.is_empty() {
                self.model.classes = parsed;
            }
        }
        if let Ok(confidence) = std::env::var("TRUCK_CONFIDENCE") {
            self.model.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRUCK_CONFIDENCE must be a number"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.confidence) {
            return Err(anyhow!("model confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(anyhow!("model iou_threshold must be within [0, 1]"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        self.model.class_filter()?;
        if self.limits.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.limits.media_deadline.is_zero() || self.limits.stream_timeout.is_zero() {
            return Err(anyhow!("media deadline and stream timeout must be greater than zero"));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(anyhow!("upload_dir must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
