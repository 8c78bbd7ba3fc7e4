//! Per-instance identity and coordinate normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AutomationError;

/// A screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Maps points authored against a reference resolution onto the device's
/// actual resolution. Each axis scales independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    scale_x: f64,
    scale_y: f64,
}

impl Normalizer {
    pub fn new(reference: Resolution, actual: Resolution) -> Result<Self, AutomationError> {
        if reference.width == 0 || reference.height == 0 {
            return Err(AutomationError::InvalidResolution(format!(
                "reference resolution {reference} has a zero dimension"
            )));
        }
        Ok(Self {
            scale_x: f64::from(actual.width) / f64::from(reference.width),
            scale_y: f64::from(actual.height) / f64::from(reference.height),
        })
    }

    pub fn scale(&self) -> (f64, f64) {
        (self.scale_x, self.scale_y)
    }

    /// Converts a reference-space point into device pixels.
    pub fn normalize(&self, x: u32, y: u32) -> (u32, u32) {
        (
            (f64::from(x) * self.scale_x).round() as u32,
            (f64::from(y) * self.scale_y).round() as u32,
        )
    }
}

/// Everything that binds the components of one workflow run to a single
/// emulator instance.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub instance_id: u32,
    pub base_resolution: Resolution,
    pub actual_resolution: Resolution,
    pub package_name: String,
    normalizer: Normalizer,
}

impl InstanceContext {
    pub fn new(
        instance_id: u32,
        base_resolution: Resolution,
        actual_resolution: Resolution,
        package_name: impl Into<String>,
    ) -> Result<Self, AutomationError> {
        let normalizer = Normalizer::new(base_resolution, actual_resolution)?;
        Ok(Self {
            instance_id,
            base_resolution,
            actual_resolution,
            package_name: package_name.into(),
            normalizer,
        })
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Resolves a point to device pixels. `real` points are passed through.
    pub fn to_device(&self, x: u32, y: u32, real: bool) -> (u32, u32) {
        if real {
            (x, y)
        } else {
            self.normalizer.normalize(x, y)
        }
    }
}
