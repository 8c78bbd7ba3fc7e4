//! Settings loaded from a YAML file.
//!
//! Every timeout, threshold and duration the engine uses lives here; nothing
//! numeric is baked into the step logic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::context::Resolution;
use crate::errors::AutomationError;
use crate::workflow::Checkpoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub emulator: EmulatorSettings,
    /// Android package the workflow drives.
    pub package: String,
    /// Resolution the workflow coordinates were authored against.
    pub reference_resolution: Resolution,
    pub paths: PathSettings,
    pub vision: VisionSettings,
    pub declutter: DeclutterSettings,
    pub watchdog: WatchdogSettings,
    pub detector: DetectorSettings,
    pub pool: PoolSettings,
    pub workflow: WorkflowSettings,
    /// Free-form named delays in seconds, read through [`Settings::timing`].
    pub timings: HashMap<String, f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            emulator: EmulatorSettings::default(),
            package: String::new(),
            reference_resolution: Resolution::new(1280, 720),
            paths: PathSettings::default(),
            vision: VisionSettings::default(),
            declutter: DeclutterSettings::default(),
            watchdog: WatchdogSettings::default(),
            detector: DetectorSettings::default(),
            pool: PoolSettings::default(),
            workflow: WorkflowSettings::default(),
            timings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorSettings {
    /// Path to the emulator control binary.
    pub path: PathBuf,
    pub command_timeout_secs: u64,
    /// Instance cloned when a new automation target is requested.
    pub base_instance: u32,
    pub boot_timeout_secs: u64,
    pub title_prefix: String,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("memuc.exe"),
            command_timeout_secs: 60,
            base_instance: 0,
            boot_timeout_secs: 120,
            title_prefix: "Pilot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub assets_dir: PathBuf,
    pub screens_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub ledger: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            screens_dir: PathBuf::from("logs/screenshots"),
            errors_dir: PathBuf::from("logs/errors"),
            ledger: PathBuf::from("database/runs.json"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub threshold: f32,
    pub poll_interval_secs: f64,
    pub timeout_secs: f64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            poll_interval_secs: 2.0,
            timeout_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclutterSettings {
    pub templates: Vec<String>,
    pub threshold: f32,
    pub settle_ms: u64,
    pub iterations: u32,
}

impl Default for DeclutterSettings {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            threshold: 0.7,
            settle_ms: 1500,
            iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub staleness_secs: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self { staleness_secs: 60 }
    }
}

/// A rectangle in reference-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Template whose presence marks the instance as unusable.
    pub template: Option<String>,
    pub threshold: Option<f32>,
    /// Screen area read by OCR when looking for keywords.
    pub region: Option<Region>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_workers: usize,
    pub stagger_secs: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: 2,
            stagger_secs: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub name: String,
    pub checkpoints: Vec<Checkpoint>,
    /// Extra attempts for a checkpoint whose command transport failed.
    pub transport_retries: u32,
    pub launch_settle_secs: f64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            checkpoints: Vec::new(),
            transport_retries: 2,
            launch_settle_secs: 5.0,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let settings = Self::from_yaml(&raw)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, AutomationError> {
        let settings: Settings = serde_yaml::from_str(raw)
            .map_err(|e| AutomationError::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AutomationError> {
        if self.reference_resolution.width == 0 || self.reference_resolution.height == 0 {
            return Err(AutomationError::InvalidResolution(format!(
                "reference resolution {} has a zero dimension",
                self.reference_resolution
            )));
        }
        if self.pool.max_workers == 0 {
            return Err(AutomationError::Config(
                "pool.max_workers must be at least 1".to_string(),
            ));
        }
        let thresholds = [
            ("vision.threshold", Some(self.vision.threshold)),
            ("declutter.threshold", Some(self.declutter.threshold)),
            ("detector.threshold", self.detector.threshold),
        ];
        for (name, value) in thresholds {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(AutomationError::Config(format!(
                        "{name} {value} is outside [0, 1]"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Named delay, falling back to `default` seconds.
    pub fn timing(&self, key: &str, default: f64) -> Duration {
        secs(self.timings.get(key).copied().unwrap_or(default))
    }
}

/// Converts fractional seconds from config into a duration. Negative or
/// non-finite values become zero.
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
