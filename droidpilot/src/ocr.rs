//! Text recognition over screen regions.

use image::RgbaImage;
use tracing::debug;
use uni_ocr::{OcrEngine, OcrProvider};

use crate::context::InstanceContext;
use crate::errors::AutomationError;
use crate::settings::Region;

/// Recognizes text in an image. Only the returned string is consumed.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &RgbaImage) -> Result<String, AutomationError>;
}

/// Recognizer backed by the platform OCR engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniOcrRecognizer;

#[async_trait::async_trait]
impl TextRecognizer for UniOcrRecognizer {
    async fn recognize(&self, image: &RgbaImage) -> Result<String, AutomationError> {
        // The engine reads from disk; the temp file is removed on drop.
        let file = tempfile::Builder::new()
            .prefix("droidpilot_ocr_")
            .suffix(".png")
            .tempfile()?;
        image.save(file.path())?;
        let path = file.path().to_string_lossy().to_string();

        let engine = OcrEngine::new(OcrProvider::Auto)
            .map_err(|e| AutomationError::Ocr(format!("Failed to create OCR engine: {e}")))?;
        let (text, _language, _confidence) = engine
            .recognize_file(&path)
            .await
            .map_err(|e| AutomationError::Ocr(format!("OCR recognition failed: {e}")))?;
        debug!("OCR read {} characters", text.len());
        Ok(text)
    }
}

/// Crops a reference-space region out of a device-resolution frame,
/// clamped to the frame bounds.
pub fn crop_region(
    frame: &RgbaImage,
    region: Region,
    context: &InstanceContext,
) -> Result<RgbaImage, AutomationError> {
    let (left, top) = context.to_device(region.x, region.y, false);
    let (right, bottom) = context.to_device(region.x + region.width, region.y + region.height, false);
    let right = right.min(frame.width());
    let bottom = bottom.min(frame.height());
    if left >= right || top >= bottom {
        return Err(AutomationError::InvalidArgument(format!(
            "region {region:?} lies outside the {}x{} frame",
            frame.width(),
            frame.height()
        )));
    }
    Ok(image::imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image())
}

/// Case-insensitive substring search for any of `keywords`.
pub fn find_keyword<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(String::as_str)
        .filter(|k| !k.trim().is_empty())
        .find(|k| haystack.contains(&k.to_lowercase()))
}
