use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::CropBounds;
use crate::storage::{DEFAULT_SNAPSHOT_DIR, DEFAULT_SNAPSHOT_URL_PREFIX};

pub const DEFAULT_CONFIG_PATH: &str = "/data/options.json";
const DEFAULT_CAMERA_NAME: &str = "exterior_frente";
const DEFAULT_MQTT_BROKER: &str = "core-mosquitto";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_TOPIC_PREFIX: &str = "homeassistant/gate";
const DEFAULT_CHECK_INTERVAL_MINUTES: f64 = 30.0;
const DEFAULT_CONFIDENCE_THRESHOLD: u32 = 70;
const DEFAULT_STARTUP_DELAY_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const REFERENCE_SUBDIR: &str = "reference";

#[derive(Debug, Deserialize, Default)]
struct GateMonitorConfigFile {
    rtsp_url: Option<String>,
    gemini_api_key: Option<String>,
    camera_name: Option<String>,
    mqtt_broker: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_topic_prefix: Option<String>,
    /// Fractional minutes are allowed (`0.5` is thirty seconds).
    check_interval_minutes: Option<f64>,
    confidence_threshold: Option<u32>,
    snapshot_dir: Option<PathBuf>,
    snapshot_url_prefix: Option<String>,
    reference_dir: Option<PathBuf>,
    gate_crop: Option<CropBounds>,
    startup_delay_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    ha_discovery_prefix: Option<String>,
}

/// Process-wide settings, loaded once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct GateMonitorConfig {
    pub rtsp_url: String,
    pub gemini_api_key: String,
    pub camera_name: String,
    pub mqtt: MqttConfig,
    pub check_interval: Duration,
    pub confidence_threshold: u8,
    pub snapshot_dir: PathBuf,
    pub snapshot_url_prefix: String,
    pub reference_dir: PathBuf,
    pub gate_crop: CropBounds,
    pub startup_delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub ha_discovery_prefix: Option<String>,
}

#[derive(Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
}

impl GateMonitorConfig {
    /// Load from `path`, apply environment overrides and validate.
    ///
    /// A missing file is treated as an empty object, so the required keys
    /// then fail validation.
    pub fn load(path: &Path) -> Result<Self> {
        let file_cfg = if path.exists() {
            read_config_file(path)?
        } else {
            log::warn!("config file {} not found, using defaults", path.display());
            GateMonitorConfigFile::default()
        };
        let threshold = file_cfg.confidence_threshold;
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate(threshold)?;
        Ok(cfg)
    }

    /// Parse and validate a JSON document without touching the environment.
    pub fn from_json(json: &str) -> Result<Self> {
        let file_cfg: GateMonitorConfigFile =
            serde_json::from_str(json).map_err(|e| anyhow!("invalid config: {}", e))?;
        let threshold = file_cfg.confidence_threshold;
        let mut cfg = Self::from_file(file_cfg);
        cfg.validate(threshold)?;
        Ok(cfg)
    }

    fn from_file(file: GateMonitorConfigFile) -> Self {
        let snapshot_dir = file
            .snapshot_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR));
        let reference_dir = file
            .reference_dir
            .unwrap_or_else(|| snapshot_dir.join(REFERENCE_SUBDIR));
        let confidence_threshold = file
            .confidence_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
            .min(100) as u8;
        Self {
            rtsp_url: file.rtsp_url.unwrap_or_default(),
            gemini_api_key: file.gemini_api_key.unwrap_or_default(),
            camera_name: file
                .camera_name
                .unwrap_or_else(|| DEFAULT_CAMERA_NAME.to_string()),
            mqtt: MqttConfig {
                broker: file
                    .mqtt_broker
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                port: file.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
                username: file.mqtt_username.filter(|u| !u.is_empty()),
                password: file.mqtt_password.filter(|p| !p.is_empty()),
                topic_prefix: file
                    .mqtt_topic_prefix
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
            },
            check_interval: interval_from_minutes(
                file.check_interval_minutes
                    .unwrap_or(DEFAULT_CHECK_INTERVAL_MINUTES),
            ),
            confidence_threshold,
            snapshot_dir,
            snapshot_url_prefix: file
                .snapshot_url_prefix
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_URL_PREFIX.to_string()),
            reference_dir,
            gate_crop: file.gate_crop.unwrap_or_default(),
            startup_delay: Duration::from_secs(
                file.startup_delay_secs.unwrap_or(DEFAULT_STARTUP_DELAY_SECS),
            ),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            ha_discovery_prefix: file.ha_discovery_prefix.filter(|p| !p.trim().is_empty()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("GATE_MONITOR_RTSP_URL") {
            self.rtsp_url = url;
        }
        if let Some(key) = env_non_empty("GEMINI_API_KEY") {
            self.gemini_api_key = key;
        }
        if let Some(broker) = env_non_empty("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = env_non_empty("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| anyhow!("MQTT_PORT must be a port number"))?;
        }
        if let Some(user) = env_non_empty("MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(password) = env_non_empty("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    fn validate(&self, raw_threshold: Option<u32>) -> Result<()> {
        if self.rtsp_url.trim().is_empty() {
            return Err(anyhow!("rtsp_url not configured"));
        }
        if self.gemini_api_key.trim().is_empty() {
            return Err(anyhow!("gemini_api_key not configured"));
        }
        if raw_threshold.is_some_and(|t| t > 100) {
            return Err(anyhow!("confidence_threshold must be between 0 and 100"));
        }
        if self.check_interval.is_zero() {
            return Err(anyhow!(
                "check_interval_minutes must be a positive number of minutes"
            ));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be greater than zero"));
        }
        if self.camera_name.trim().is_empty() {
            return Err(anyhow!("camera_name must not be empty"));
        }
        self.gate_crop
            .validate()
            .map_err(|e| anyhow!("invalid gate_crop: {}", e))?;
        Ok(())
    }
}

impl fmt::Debug for GateMonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateMonitorConfig")
            .field("rtsp_url", &self.rtsp_url)
            .field("gemini_api_key", &"<redacted>")
            .field("camera_name", &self.camera_name)
            .field("mqtt", &self.mqtt)
            .field("check_interval", &self.check_interval)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("snapshot_dir", &self.snapshot_dir)
            .field("reference_dir", &self.reference_dir)
            .field("gate_crop", &self.gate_crop)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

fn read_config_file(path: &Path) -> Result<GateMonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Negative or unrepresentable values map to zero, which validation rejects.
fn interval_from_minutes(minutes: f64) -> Duration {
    Duration::try_from_secs_f64(minutes * 60.0).unwrap_or(Duration::ZERO)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
