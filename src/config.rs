use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::CameraConfig;
use crate::meta::ModelMeta;
use crate::publish::{
    PublishConfig, DEFAULT_CLIENT_ID, DEFAULT_FIREHOSE_TOPIC, DEFAULT_RESULT_TOPIC,
};

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_CAMERA_FPS: u32 = 60;
const DEFAULT_ALERT_DURATION_SECS: f64 = 1.0;
const DEFAULT_TRIGGER_CLASS: &str = "face";

const MODELS_DIR: &str = "blueoil/output/output/models";
const MODEL_FILE: &str = "lib/libdlk_fpga.so";
const META_FILE: &str = "meta.yaml";

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    resource_prefix: Option<PathBuf>,
    model_path: Option<PathBuf>,
    meta_path: Option<PathBuf>,
    meta_preset: Option<String>,
    addr: Option<String>,
    score_threshold: Option<f32>,
    font_path: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    alert: Option<AlertConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    duration_secs: Option<f64>,
    trigger_class: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    firehose_topic: Option<String>,
    result_topic: Option<String>,
}

/// Settings for the MJPEG inference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub model_path: PathBuf,
    pub meta_path: PathBuf,
    /// Built-in metadata used instead of `meta_path` (see `ModelMeta::preset`).
    pub meta_preset: Option<String>,
    pub addr: String,
    /// Replaces every `ExcludeLowScoreBox` threshold of the model.
    pub score_threshold: f32,
    pub font_path: Option<PathBuf>,
    pub camera: CameraConfig,
    pub alert_duration: Duration,
    pub trigger_class: String,
    pub publish: PublishConfig,
}

impl ServerConfig {
    /// Defaults, then the JSON file named by `BLUEOIL_SERVER_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BLUEOIL_SERVER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Result<Self> {
        let (mut model_path, mut meta_path) = match file.resource_prefix.as_deref() {
            Some(prefix) => resource_paths(prefix),
            None => (PathBuf::new(), PathBuf::new()),
        };
        if let Some(path) = file.model_path {
            model_path = path;
        }
        if let Some(path) = file.meta_path {
            meta_path = path;
        }

        let camera = file.camera.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        Ok(Self {
            model_path,
            meta_path,
            meta_preset: file.meta_preset,
            addr: file.addr.unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            score_threshold: file.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
            font_path: file.font_path,
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            alert_duration: duration_from_secs(
                alert.duration_secs.unwrap_or(DEFAULT_ALERT_DURATION_SECS),
            )?,
            trigger_class: alert
                .trigger_class
                .unwrap_or_else(|| DEFAULT_TRIGGER_CLASS.to_string()),
            publish: PublishConfig {
                broker: mqtt.broker,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                firehose_topic: mqtt
                    .firehose_topic
                    .unwrap_or_else(|| DEFAULT_FIREHOSE_TOPIC.to_string()),
                result_topic: mqtt
                    .result_topic
                    .unwrap_or_else(|| DEFAULT_RESULT_TOPIC.to_string()),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(prefix) = non_empty_env("AWS_GG_RESOURCE_PREFIX") {
            let (model_path, meta_path) = resource_paths(Path::new(&prefix));
            self.model_path = model_path;
            self.meta_path = meta_path;
        }
        if let Some(path) = non_empty_env("BLUEOIL_MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("BLUEOIL_META_PATH") {
            self.meta_path = PathBuf::from(path);
        }
        if let Some(preset) = non_empty_env("BLUEOIL_META_PRESET") {
            self.meta_preset = Some(preset);
        }
        if let Some(addr) = non_empty_env("BLUEOIL_SERVER_ADDR") {
            self.addr = addr;
        }
        if let Some(threshold) = non_empty_env("BOX_SCORE_THRESHOLD") {
            self.score_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("BOX_SCORE_THRESHOLD must be a number"))?;
        }
        if let Some(device) = non_empty_env("BLUEOIL_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(secs) = non_empty_env("BLUEOIL_ALERT_DURATION_SECS") {
            let secs: f64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("BLUEOIL_ALERT_DURATION_SECS must be a number of seconds"))?;
            self.alert_duration = duration_from_secs(secs)?;
        }
        if let Some(class) = non_empty_env("BLUEOIL_TRIGGER_CLASS") {
            self.trigger_class = class;
        }
        if let Some(path) = non_empty_env("BLUEOIL_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(broker) = non_empty_env("MQTT_BROKER_ADDR") {
            self.publish.broker = Some(broker);
        }
        if let Some(client_id) = non_empty_env("MQTT_CLIENT_ID") {
            self.publish.client_id = client_id;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(anyhow!(
                "model path not configured; set AWS_GG_RESOURCE_PREFIX or BLUEOIL_MODEL_PATH"
            ));
        }
        match self.meta_preset.as_deref() {
            Some(preset) => {
                ModelMeta::preset(preset)?;
            }
            None if self.meta_path.as_os_str().is_empty() => {
                return Err(anyhow!(
                    "model meta not configured; set AWS_GG_RESOURCE_PREFIX, \
                     BLUEOIL_META_PATH or BLUEOIL_META_PRESET"
                ));
            }
            None => {}
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(anyhow!(
                "score threshold must be within [0, 1], got {}",
                self.score_threshold
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.fps == 0 {
            return Err(anyhow!("camera width, height and fps must be non-zero"));
        }
        if self.trigger_class.trim().is_empty() {
            return Err(anyhow!("trigger class must not be empty"));
        }
        Ok(())
    }
}

/// Model and meta locations inside a deployed resource directory.
pub fn resource_paths(prefix: &Path) -> (PathBuf, PathBuf) {
    let models = prefix.join(MODELS_DIR);
    (models.join(MODEL_FILE), models.join(META_FILE))
}

fn duration_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("alert duration must be a non-negative number of seconds"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ServerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
