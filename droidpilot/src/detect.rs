use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::InstanceContext;
use crate::errors::AutomationError;
use crate::ocr::{crop_region, find_keyword, TextRecognizer};
use crate::settings::{DetectorSettings, Region};
use crate::vision::VisualMatcher;

const DEFAULT_DETECTOR_THRESHOLD: f32 = 0.9;

/// Recognizes a screen that makes the instance unusable, such as a crash or
/// error dialog. Either signal is enough: a dedicated template match, or a
/// configured keyword in the OCR text of a screen region.
#[derive(Clone)]
pub struct FaultDetector {
    matcher: VisualMatcher,
    context: Arc<InstanceContext>,
    ocr: Option<Arc<dyn TextRecognizer>>,
    template: Option<String>,
    threshold: f32,
    region: Option<Region>,
    keywords: Vec<String>,
}

impl FaultDetector {
    pub fn new(
        matcher: VisualMatcher,
        context: Arc<InstanceContext>,
        ocr: Option<Arc<dyn TextRecognizer>>,
        settings: &DetectorSettings,
    ) -> Self {
        Self {
            matcher,
            context,
            ocr,
            template: settings.template.clone(),
            threshold: settings.threshold.unwrap_or(DEFAULT_DETECTOR_THRESHOLD),
            region: settings.region,
            keywords: settings.keywords.clone(),
        }
    }

    pub async fn is_detected(&self) -> Result<bool, AutomationError> {
        if let Some(template) = &self.template {
            let result = self.matcher.locate(template, self.threshold).await?;
            if result.found {
                warn!(
                    "Fault screen '{template}' matched on instance {} ({:.2})",
                    self.context.instance_id, result.confidence
                );
                return Ok(true);
            }
        }
        self.text_signal().await
    }

    async fn text_signal(&self) -> Result<bool, AutomationError> {
        let (Some(ocr), Some(region)) = (&self.ocr, self.region) else {
            return Ok(false);
        };
        if self.keywords.is_empty() {
            return Ok(false);
        }

        let frame = self.matcher.snapshot().await?.load_rgba()?;
        let cropped = crop_region(&frame, region, &self.context)?;
        let text = ocr.recognize(&cropped).await?;
        debug!("Fault region text: {text:?}");

        match find_keyword(&text, &self.keywords) {
            Some(keyword) => {
                warn!(
                    "Fault keyword '{keyword}' read on instance {}",
                    self.context.instance_id
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
