use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::errors::AutomationError;
use crate::platforms::{InstanceControl, InstanceStatus};

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Creates, boots and destroys automation targets through the control
/// binary.
#[derive(Clone)]
pub struct InstanceManager {
    control: Arc<dyn InstanceControl>,
    title_prefix: String,
}

impl InstanceManager {
    pub fn new(control: Arc<dyn InstanceControl>, title_prefix: impl Into<String>) -> Self {
        Self {
            control,
            title_prefix: title_prefix.into(),
        }
    }

    /// Clones `base_id` and gives the copy a timestamped title.
    #[instrument(skip(self))]
    pub async fn create_from_base(&self, base_id: u32) -> Result<u32, AutomationError> {
        info!("Cloning base instance {base_id}");
        let new_id = self.control.clone_instance(base_id).await?;
        let title = format!("{}_{}", self.title_prefix, Local::now().format("%d%m_%H%M"));
        if let Err(e) = self.control.rename(new_id, &title).await {
            warn!("Instance {new_id} created but could not be renamed: {e}");
        }
        info!("Created instance {new_id}");
        Ok(new_id)
    }

    /// Starts the instance unless it already runs, then waits until the
    /// control binary reports it running.
    #[instrument(skip(self))]
    pub async fn ensure_running(&self, instance_id: u32, boot_timeout: Duration) -> Result<(), AutomationError> {
        if self.control.is_running(instance_id).await? {
            return Ok(());
        }
        info!("Starting instance {instance_id}");
        self.control.start(instance_id).await?;

        let started = Instant::now();
        loop {
            if self.control.is_running(instance_id).await? {
                return Ok(());
            }
            if started.elapsed() >= boot_timeout {
                return Err(AutomationError::TransportFailure(format!(
                    "instance {instance_id} did not boot within {boot_timeout:?}"
                )));
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    /// Stops and removes the instance.
    #[instrument(skip(self))]
    pub async fn destroy(&self, instance_id: u32) -> Result<(), AutomationError> {
        warn!("Removing instance {instance_id}");
        if let Err(e) = self.control.stop(instance_id).await {
            warn!("Stopping instance {instance_id} before removal failed: {e}");
        }
        self.control.remove(instance_id).await
    }

    pub async fn list(&self) -> Result<Vec<InstanceStatus>, AutomationError> {
        self.control.list().await
    }
}
