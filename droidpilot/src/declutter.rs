use std::time::Duration;
use tracing::{info, instrument};

use crate::errors::AutomationError;
use crate::input::InputDispatcher;
use crate::settings::DeclutterSettings;
use crate::vision::VisualMatcher;

/// Dismisses stacked overlays by tapping any known close control.
#[derive(Clone)]
pub struct Declutter {
    matcher: VisualMatcher,
    input: InputDispatcher,
    templates: Vec<String>,
    threshold: f32,
    settle: Duration,
}

impl Declutter {
    pub fn new(matcher: VisualMatcher, input: InputDispatcher, settings: &DeclutterSettings) -> Self {
        Self {
            matcher,
            input,
            templates: settings.templates.clone(),
            threshold: settings.threshold,
            settle: Duration::from_millis(settings.settle_ms),
        }
    }

    /// Runs at most `max_iterations` rounds over the dismissal templates,
    /// stopping after the first round that dismisses nothing. Returns whether
    /// anything was dismissed.
    #[instrument(level = "debug", skip(self))]
    pub async fn clean(&self, max_iterations: u32) -> Result<bool, AutomationError> {
        let mut any_dismissed = false;
        for round in 1..=max_iterations {
            let mut dismissed = false;
            for template in &self.templates {
                let result = self.matcher.locate(template, self.threshold).await?;
                if let Some((x, y)) = result.center() {
                    self.input.tap(x, y, true).await?;
                    info!("Dismissed overlay '{template}' in round {round}");
                    tokio::time::sleep(self.settle).await;
                    dismissed = true;
                }
            }
            if !dismissed {
                break;
            }
            any_dismissed = true;
        }
        Ok(any_dismissed)
    }
}
