use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::context::InstanceContext;
use crate::errors::AutomationError;
use crate::platforms::DeviceShell;

/// Android key code for delete/backspace.
pub const KEYCODE_DEL: u32 = 67;

/// Injects touch and key events into one instance.
///
/// Every point-taking method has a `real` flag: `true` means the point is
/// already in device pixels (for example a [`crate::vision::MatchResult`]
/// center), `false` means it was authored against the reference resolution
/// and is normalized once here.
#[derive(Clone)]
pub struct InputDispatcher {
    shell: Arc<dyn DeviceShell>,
    context: Arc<InstanceContext>,
}

impl InputDispatcher {
    pub fn new(shell: Arc<dyn DeviceShell>, context: Arc<InstanceContext>) -> Self {
        Self { shell, context }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn tap(&self, x: u32, y: u32, real: bool) -> Result<(), AutomationError> {
        let (dx, dy) = self.context.to_device(x, y, real);
        debug!("tap ({x}, {y}) -> device ({dx}, {dy})");
        self.shell
            .tap(self.context.instance_id, dx, dy)
            .await
            .map_err(into_dispatch_error)
    }

    pub async fn double_tap(
        &self,
        x: u32,
        y: u32,
        interval: Duration,
        real: bool,
    ) -> Result<(), AutomationError> {
        let (dx, dy) = self.context.to_device(x, y, real);
        self.tap(dx, dy, true).await?;
        tokio::time::sleep(interval).await;
        self.tap(dx, dy, true).await
    }

    /// A swipe whose endpoints coincide, held for `duration_ms`.
    pub async fn long_press(
        &self,
        x: u32,
        y: u32,
        duration_ms: u64,
        real: bool,
    ) -> Result<(), AutomationError> {
        let (dx, dy) = self.context.to_device(x, y, real);
        self.shell
            .swipe(self.context.instance_id, (dx, dy), (dx, dy), duration_ms)
            .await
            .map_err(into_dispatch_error)
    }

    pub async fn swipe(
        &self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u64,
        real: bool,
    ) -> Result<(), AutomationError> {
        let from = self.context.to_device(from.0, from.1, real);
        let to = self.context.to_device(to.0, to.1, real);
        self.shell
            .swipe(self.context.instance_id, from, to, duration_ms)
            .await
            .map_err(into_dispatch_error)
    }

    pub async fn key(&self, key_code: u32) -> Result<(), AutomationError> {
        self.shell
            .key_event(self.context.instance_id, key_code)
            .await
            .map_err(into_dispatch_error)
    }

    /// Clears a focused field with `backspaces` delete events, then types
    /// `text`.
    pub async fn replace_text(&self, text: &str, backspaces: u32) -> Result<(), AutomationError> {
        for _ in 0..backspaces {
            self.key(KEYCODE_DEL).await?;
        }
        self.shell
            .input_text(self.context.instance_id, text)
            .await
            .map_err(into_dispatch_error)
    }
}

fn into_dispatch_error(error: AutomationError) -> AutomationError {
    match error {
        AutomationError::InputDispatchFailed(_) => error,
        other => AutomationError::InputDispatchFailed(other.to_string()),
    }
}
