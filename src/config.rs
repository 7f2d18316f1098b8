//! Configuration management for projmap

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Dimensions;

/// Preferred capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureFormat {
    /// Prefer MJPEG (lower bandwidth, decoded on the host)
    #[default]
    Mjpeg,
    /// Prefer YUYV (higher bandwidth, no decode step)
    Yuyv,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default)]
    pub format: CaptureFormat,
    /// A camera frame older than this is treated as unavailable
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
}

fn default_stale_timeout_ms() -> u64 {
    2000
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input_device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            format: CaptureFormat::default(),
            stale_timeout_ms: default_stale_timeout_ms(),
        }
    }
}

impl VideoConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

/// Projector output (v4l2loopback device feeding the projector)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    pub output_device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            output_device: "/dev/video10".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl ProjectorConfig {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8091,
        }
    }
}

/// Calibration session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Calibration document written by `calibrate` and read by `run`
    pub file: PathBuf,
    /// Surfaces to calibrate unless overridden on the command line
    pub surfaces: usize,
    pub marker_color: [u8; 3],
    pub marker_size: f64,
    pub marker_thickness: u32,
    pub outline_thickness: u32,
    /// How long each wait for a pointer event lasts before the camera
    /// view is refreshed again
    pub poll_interval_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("calibration.json"),
            surfaces: 1,
            marker_color: [255, 255, 255],
            marker_size: 30.0,
            marker_thickness: 3,
            outline_thickness: 6,
            poll_interval_ms: 10,
        }
    }
}

impl CalibrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub projector: ProjectorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
