//! Boundaries to the emulator: the per-instance device shell and the
//! instance lifecycle control binary.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::context::Resolution;
use crate::errors::AutomationError;

pub mod memuc;
pub mod parse;

pub use memuc::MemucController;

/// Shell-level access to one running instance. Every call is scoped by
/// instance id so implementations may be shared between concurrent workers.
#[async_trait::async_trait]
pub trait DeviceShell: Send + Sync {
    async fn tap(&self, instance_id: u32, x: u32, y: u32) -> Result<(), AutomationError>;

    async fn swipe(
        &self,
        instance_id: u32,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u64,
    ) -> Result<(), AutomationError>;

    async fn key_event(&self, instance_id: u32, key_code: u32) -> Result<(), AutomationError>;

    async fn input_text(&self, instance_id: u32, text: &str) -> Result<(), AutomationError>;

    /// Captures the current screen into `destination` on the host.
    async fn capture_screen(
        &self,
        instance_id: u32,
        destination: &Path,
    ) -> Result<(), AutomationError>;

    async fn screen_resolution(&self, instance_id: u32) -> Result<Resolution, AutomationError>;

    async fn start_app(&self, instance_id: u32, package: &str) -> Result<(), AutomationError>;

    async fn stop_app(&self, instance_id: u32, package: &str) -> Result<(), AutomationError>;

    /// Reads the device-wide HTTP proxy, `None` when unset.
    async fn proxy(&self, instance_id: u32) -> Result<Option<String>, AutomationError>;
}

/// One row of the emulator's instance listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub index: u32,
    pub title: String,
    pub running: bool,
    pub pid: Option<u32>,
}

impl InstanceStatus {
    /// Operator-facing label for the running state.
    pub fn state_label(&self) -> &'static str {
        if self.running {
            "Running"
        } else {
            "Stopped"
        }
    }
}

/// Lifecycle control of emulator instances.
#[async_trait::async_trait]
pub trait InstanceControl: Send + Sync {
    async fn start(&self, instance_id: u32) -> Result<(), AutomationError>;

    async fn stop(&self, instance_id: u32) -> Result<(), AutomationError>;

    /// Clones `base_id` and returns the index of the new instance.
    async fn clone_instance(&self, base_id: u32) -> Result<u32, AutomationError>;

    async fn remove(&self, instance_id: u32) -> Result<(), AutomationError>;

    async fn rename(&self, instance_id: u32, title: &str) -> Result<(), AutomationError>;

    async fn list(&self) -> Result<Vec<InstanceStatus>, AutomationError>;

    async fn is_running(&self, instance_id: u32) -> Result<bool, AutomationError>;
}
