use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::CaptureError;
use crate::graph::SyntheticPlan;
use crate::provider::ProviderType;

const DEFAULT_PROVIDER: ProviderType = ProviderType::Elgato;
const DEFAULT_FRAME_HEIGHT: u32 = 1080;
const DEFAULT_DEVICE: &str = "stub://capture0";
const DEFAULT_SYNTHETIC_FPS: u32 = 30;
const MAX_SYNTHETIC_FPS: u32 = 1000;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    provider: Option<ProviderType>,
    frame_height: Option<u32>,
    use_cpu: Option<bool>,
    device: Option<String>,
    synthetic: Option<SyntheticConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SyntheticConfigFile {
    fps: Option<u32>,
    fail_stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub provider: ProviderType,
    /// Requested frame height; mapped onto the hardware profile ladder.
    pub frame_height: u32,
    /// Copy frames through system memory instead of the GPU.
    pub use_cpu: bool,
    /// Device identifier. `stub://` selects synthetic hardware.
    pub device: String,
    pub synthetic: SyntheticSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSettings {
    pub fps: u32,
    pub fail_stage: Option<String>,
}

impl SyntheticSettings {
    pub fn plan(&self) -> SyntheticPlan {
        SyntheticPlan {
            fps: self.fps,
            fail_stage: self.fail_stage.clone(),
            ..SyntheticPlan::default()
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER,
            frame_height: DEFAULT_FRAME_HEIGHT,
            use_cpu: false,
            device: DEFAULT_DEVICE.to_string(),
            synthetic: SyntheticSettings {
                fps: DEFAULT_SYNTHETIC_FPS,
                fail_stage: None,
            },
        }
    }
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let defaults = Self::default();
        let synthetic = SyntheticSettings {
            fps: file
                .synthetic
                .as_ref()
                .and_then(|synthetic| synthetic.fps)
                .unwrap_or(defaults.synthetic.fps),
            fail_stage: file
                .synthetic
                .and_then(|synthetic| synthetic.fail_stage),
        };
        Self {
            provider: file.provider.unwrap_or(defaults.provider),
            frame_height: file.frame_height.unwrap_or(defaults.frame_height),
            use_cpu: file.use_cpu.unwrap_or(defaults.use_cpu),
            device: file.device.unwrap_or(defaults.device),
            synthetic,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(provider) = std::env::var("CAPTURE_PROVIDER") {
            if !provider.trim().is_empty() {
                self.provider = provider.parse()?;
            }
        }
        if let Ok(height) = std::env::var("CAPTURE_FRAME_HEIGHT") {
            self.frame_height = height
                .trim()
                .parse()
                .map_err(|_| {
                    CaptureError::Config(
                        "CAPTURE_FRAME_HEIGHT must be an integer number of rows".to_string(),
                    )
                })?;
        }
        if let Ok(use_cpu) = std::env::var("CAPTURE_USE_CPU") {
            self.use_cpu = parse_bool(&use_cpu)
                .ok_or_else(|| {
                CaptureError::Config("CAPTURE_USE_CPU must be true/false or 1/0".to_string())
            })?;
        }
        if let Ok(device) = std::env::var("CAPTURE_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(fps) = std::env::var("CAPTURE_SYNTHETIC_FPS") {
            self.synthetic.fps = fps
                .trim()
                .parse()
                .map_err(|_| {
                    CaptureError::Config("CAPTURE_SYNTHETIC_FPS must be an integer".to_string())
                })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> std::result::Result<(), CaptureError> {
        if self.frame_height == 0 {
            return Err(CaptureError::Config(
                "frame_height must be greater than zero".to_string(),
            ));
        }
        self.device = self.device.trim().to_string();
        if self.device.is_empty() {
            return Err(CaptureError::Config("device must not be empty".to_string()));
        }
        if self.synthetic.fps > MAX_SYNTHETIC_FPS {
            return Err(CaptureError::Config(format!(
                "synthetic fps must be at most {}",
                MAX_SYNTHETIC_FPS
            )));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
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

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
