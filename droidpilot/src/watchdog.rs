//! Frozen-application detection by frame hashing.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::context::InstanceContext;
use crate::errors::AutomationError;
use crate::platforms::DeviceShell;
use crate::screen::ScreenCapture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    /// Frames are changing.
    Active,
    /// The frame stayed identical past the staleness timeout.
    Stalled,
}

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// A stall was detected and the application was restarted.
    Restarted,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogState {
    pub last_frame_hash: Option<blake3::Hash>,
    pub last_change: Instant,
    pub phase: WatchdogPhase,
}

impl WatchdogState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_frame_hash: None,
            last_change: now,
            phase: WatchdogPhase::Active,
        }
    }

    /// Feeds one frame hash observed at `now`. Returns `true` when this
    /// observation crosses into a stall; the stall clock is then reset so the
    /// same stall is not reported again until another full timeout passes.
    pub fn observe(&mut self, hash: blake3::Hash, now: Instant, staleness: Duration) -> bool {
        if self.last_frame_hash != Some(hash) {
            self.last_frame_hash = Some(hash);
            self.last_change = now;
            self.phase = WatchdogPhase::Active;
            return false;
        }
        if now.duration_since(self.last_change) > staleness {
            self.phase = WatchdogPhase::Stalled;
            self.last_change = now;
            return true;
        }
        false
    }
}

/// Restarts the foreground application when its screen stops changing.
/// Owned by one worker; not shared across instances.
pub struct FreezeWatchdog {
    shell: Arc<dyn DeviceShell>,
    context: Arc<InstanceContext>,
    capture: ScreenCapture,
    staleness: Duration,
    state: WatchdogState,
}

impl FreezeWatchdog {
    pub fn new(
        shell: Arc<dyn DeviceShell>,
        context: Arc<InstanceContext>,
        capture: ScreenCapture,
        staleness: Duration,
    ) -> Self {
        Self {
            shell,
            context,
            capture,
            staleness,
            state: WatchdogState::new(Instant::now()),
        }
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.state.phase
    }

    /// Hashes the current frame and restarts the package when the hash has
    /// not changed for longer than the staleness timeout.
    #[instrument(level = "debug", skip(self), fields(instance = self.context.instance_id))]
    pub async fn check_and_recover(&mut self) -> Result<Health, AutomationError> {
        let frame = self.capture.capture().await?;
        let hash = frame.hash().await?;

        if !self.state.observe(hash, Instant::now(), self.staleness) {
            return Ok(Health::Healthy);
        }

        warn!(
            "Screen of instance {} unchanged for over {:?}, restarting {}",
            self.context.instance_id, self.staleness, self.context.package_name
        );
        self.shell
            .stop_app(self.context.instance_id, &self.context.package_name)
            .await?;
        self.shell
            .start_app(self.context.instance_id, &self.context.package_name)
            .await?;
        self.state.last_change = Instant::now();
        info!("Restarted {}", self.context.package_name);
        Ok(Health::Restarted)
    }
}
