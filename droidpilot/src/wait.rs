//! Fixed-interval polling for visual conditions.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::errors::AutomationError;
use crate::input::InputDispatcher;
use crate::settings::{secs, VisionSettings};
use crate::vision::{MatchResult, VisualMatcher};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub threshold: f32,
    /// Tap the match center as soon as the template is found.
    pub click_on_find: bool,
}

impl WaitOptions {
    pub fn from_settings(vision: &VisionSettings) -> Self {
        Self {
            timeout: secs(vision.timeout_secs),
            poll_interval: secs(vision.poll_interval_secs),
            threshold: vision.threshold,
            click_on_find: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn click(mut self, click_on_find: bool) -> Self {
        self.click_on_find = click_on_find;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_settings(&VisionSettings::default())
    }
}

/// Polls a [`VisualMatcher`] until a template shows up.
#[derive(Clone)]
pub struct Waiter {
    matcher: VisualMatcher,
    input: InputDispatcher,
}

impl Waiter {
    pub fn new(matcher: VisualMatcher, input: InputDispatcher) -> Self {
        Self { matcher, input }
    }

    pub fn matcher(&self) -> &VisualMatcher {
        &self.matcher
    }

    /// Returns the match once `key` is on screen, or `None` after `timeout`.
    ///
    /// The matcher runs at least once, so a zero timeout is a single check.
    /// On timeout a failure screenshot is written to the evidence directory.
    #[instrument(level = "debug", skip(self, options), fields(timeout = ?options.timeout))]
    pub async fn wait_for(
        &self,
        key: &str,
        options: WaitOptions,
    ) -> Result<Option<MatchResult>, AutomationError> {
        info!("Waiting for '{key}' (limit {:?})", options.timeout);
        let started = Instant::now();
        let mut best_miss = 0.0f32;

        loop {
            let result = self.matcher.locate(key, options.threshold).await?;
            if result.found {
                if options.click_on_find {
                    // Matcher output is already in device pixels.
                    self.input.tap(result.x, result.y, true).await?;
                }
                return Ok(Some(result));
            }
            best_miss = best_miss.max(result.confidence);

            let elapsed = started.elapsed();
            if elapsed >= options.timeout {
                break;
            }
            let remaining = options.timeout - elapsed;
            tokio::time::sleep(options.poll_interval.min(remaining)).await;
        }

        error!(
            "'{key}' not found within {:?} (best confidence {best_miss:.2})",
            options.timeout
        );
        if let Err(e) = self.matcher.capture().capture_evidence(key).await {
            warn!("Could not save failure screenshot for '{key}': {e}");
        }
        Ok(None)
    }

    /// Like [`Waiter::wait_for`] but a timeout is an error.
    pub async fn require(
        &self,
        key: &str,
        options: WaitOptions,
    ) -> Result<MatchResult, AutomationError> {
        self.wait_for(key, options)
            .await?
            .ok_or_else(|| AutomationError::MatchTimeout(key.to_string()))
    }
}
