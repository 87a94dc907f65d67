// src/config.rs

use crate::types::DetectionParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub capture: CaptureConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub ws_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frames per second, integer ≥ 1.
    pub rate_fps: u32,
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: u32,
    pub input_dir: String,
    pub output_dir: String,
    #[serde(default)]
    pub save_annotated: bool,
    /// Ask the backend for its own annotated visualization PNG.
    #[serde(default)]
    pub visualize: bool,
    /// Optional rectification insets forwarded to the backend.
    #[serde(default)]
    pub insets: Option<InsetConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InsetConfig {
    pub base: f32,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached name suppresses re-insertion.
    pub cooldown_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { cooldown_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub heartbeat_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_secs: 30,
            reconnect_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.capture.rate_fps < 1 {
            anyhow::bail!("capture.rate_fps must be ≥ 1");
        }
        if !(0.0..=1.0).contains(&self.capture.confidence) {
            anyhow::bail!("capture.confidence must be within 0..1");
        }
        if !(0.0..=1.0).contains(&self.capture.iou) {
            anyhow::bail!("capture.iou must be within 0..1");
        }
        if self.capture.max_detections < 1 {
            anyhow::bail!("capture.max_detections must be ≥ 1");
        }
        Ok(())
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            visualize: self.capture.visualize,
            confidence: self.capture.confidence,
            iou: self.capture.iou,
            max_detections: self.capture.max_detections,
            insets: self.capture.insets.map(|i| (i.base, i.min, i.max)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
backend:
  base_url: "http://localhost:8000"
  ws_url: "ws://localhost:8000/ws"
capture:
  rate_fps: 2
  confidence: 0.25
  iou: 0.5
  max_detections: 5
  input_dir: "frames"
  output_dir: "output"
"#;

    #[test]
    fn test_parse_minimal_config_with_defaults() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.backend.request_timeout_secs, 30);
        assert_eq!(config.cache.cooldown_secs, 120);
        assert_eq!(config.channel.heartbeat_secs, 30);
        assert_eq!(config.channel.reconnect_delay_ms, 3000);
        assert_eq!(config.logging.level, "info");
        assert!(config.capture.insets.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.capture.rate_fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detection_params_carry_insets() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.capture.insets = Some(InsetConfig {
            base: 0.012,
            min: 0.008,
            max: 0.035,
        });
        let params = config.detection_params();
        assert_eq!(params.insets, Some((0.012, 0.008, 0.035)));
        assert_eq!(params.max_detections, 5);
    }
}
