//! Template matching against captured screen frames.
//!
//! Scores are the normalized correlation coefficient between the template and
//! each same-sized window of the frame, both reduced to grayscale. Large
//! templates are first located on a downscaled copy and then refined at full
//! resolution around the best coarse candidates.

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::errors::AutomationError;
use crate::screen::{ScreenCapture, ScreenFrame};

const EPSILON: f64 = 1e-9;
/// Templates whose shorter side is below this are searched at full resolution.
const COARSE_MIN_SIDE: u32 = 16;
const MAX_DOWNSCALE: u32 = 4;
const COARSE_CANDIDATES: usize = 5;

/// Outcome of one locate attempt. Coordinates are the template's center in
/// device pixels; `confidence` is reported even when nothing was found.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub found: bool,
    pub x: u32,
    pub y: u32,
    pub confidence: f32,
}

impl MatchResult {
    pub fn miss(confidence: f32) -> Self {
        Self {
            found: false,
            x: 0,
            y: 0,
            confidence,
        }
    }

    pub fn center(&self) -> Option<(u32, u32)> {
        self.found.then_some((self.x, self.y))
    }
}

/// Best placement of a template inside a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Top-left corner of the matched window.
    pub left: u32,
    pub top: u32,
    pub score: f32,
}

/// Summed-area tables over pixel values and their squares.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0.0; stride * (height as usize + 1)];
        let mut sq = vec![0.0; stride * (height as usize + 1)];
        let raw = image.as_raw();
        for y in 0..height as usize {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width as usize {
                let v = f64::from(raw[y * width as usize + x]);
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, table: &[f64], left: u32, top: u32, width: u32, height: u32) -> f64 {
        let (x0, y0) = (left as usize, top as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        table[y1 * self.stride + x1] - table[y0 * self.stride + x1] - table[y1 * self.stride + x0]
            + table[y0 * self.stride + x0]
    }
}

struct PreparedTemplate<'a> {
    image: &'a GrayImage,
    centered: Vec<f64>,
    variance: f64,
}

impl<'a> PreparedTemplate<'a> {
    fn new(image: &'a GrayImage) -> Self {
        let n = f64::from(image.width() * image.height());
        let mean = image.as_raw().iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let centered: Vec<f64> = image.as_raw().iter().map(|&v| f64::from(v) - mean).collect();
        let variance = centered.iter().map(|v| v * v).sum();
        Self {
            image,
            centered,
            variance,
        }
    }

    fn score_at(&self, frame: &GrayImage, integral: &Integral, left: u32, top: u32) -> f32 {
        let (tw, th) = self.image.dimensions();
        let n = f64::from(tw * th);
        let window_sum = integral.window(&integral.sum, left, top, tw, th);
        let window_sq = integral.window(&integral.sq, left, top, tw, th);
        let window_variance = (window_sq - window_sum * window_sum / n).max(0.0);

        let raw = frame.as_raw();
        let frame_width = frame.width() as usize;
        let mut numerator = 0.0;
        for ty in 0..th as usize {
            let frame_row = (top as usize + ty) * frame_width + left as usize;
            let template_row = ty * tw as usize;
            for tx in 0..tw as usize {
                numerator += self.centered[template_row + tx] * f64::from(raw[frame_row + tx]);
            }
        }

        let denominator = (self.variance * window_variance).sqrt();
        if denominator > EPSILON {
            (numerator / denominator).clamp(-1.0, 1.0) as f32
        } else if self.variance <= EPSILON && window_variance <= EPSILON {
            // Two flat patches correlate perfectly.
            1.0
        } else {
            0.0
        }
    }

    /// Scores every placement in the inclusive ranges and returns the best
    /// `keep` of them, highest first.
    fn search(
        &self,
        frame: &GrayImage,
        integral: &Integral,
        lefts: (u32, u32),
        tops: (u32, u32),
        keep: usize,
    ) -> Vec<Placement> {
        let mut best: Vec<Placement> = Vec::with_capacity(keep + 1);
        for top in tops.0..=tops.1 {
            for left in lefts.0..=lefts.1 {
                let score = self.score_at(frame, integral, left, top);
                if best.len() < keep || score > best[best.len() - 1].score {
                    let at = best.partition_point(|p| p.score >= score);
                    best.insert(at, Placement { left, top, score });
                    best.truncate(keep);
                }
            }
        }
        best
    }
}

/// Finds the placement of `template` in `frame` with the highest
/// normalized correlation. `None` when the template does not fit.
pub fn match_template(frame: &GrayImage, template: &GrayImage) -> Option<Placement> {
    let (fw, fh) = frame.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > fw || th > fh {
        return None;
    }

    let prepared = PreparedTemplate::new(template);
    let integral = Integral::new(frame);
    let max_left = fw - tw;
    let max_top = fh - th;

    let factor = (tw.min(th) / COARSE_MIN_SIDE).min(MAX_DOWNSCALE);
    if factor < 2 {
        return prepared
            .search(frame, &integral, (0, max_left), (0, max_top), 1)
            .into_iter()
            .next();
    }

    let small_frame = imageops::resize(frame, fw / factor, fh / factor, FilterType::Triangle);
    let small_template = imageops::resize(template, tw / factor, th / factor, FilterType::Triangle);
    let (sfw, sfh) = small_frame.dimensions();
    let (stw, sth) = small_template.dimensions();
    if stw > sfw || sth > sfh {
        return prepared
            .search(frame, &integral, (0, max_left), (0, max_top), 1)
            .into_iter()
            .next();
    }

    let small_prepared = PreparedTemplate::new(&small_template);
    let small_integral = Integral::new(&small_frame);
    let candidates = small_prepared.search(
        &small_frame,
        &small_integral,
        (0, sfw - stw),
        (0, sfh - sth),
        COARSE_CANDIDATES,
    );

    let radius = factor * 2;
    candidates
        .iter()
        .filter_map(|candidate| {
            let cx = candidate.left * factor;
            let cy = candidate.top * factor;
            let lefts = (cx.saturating_sub(radius), (cx + radius).min(max_left));
            let tops = (cy.saturating_sub(radius), (cy + radius).min(max_top));
            if lefts.0 > lefts.1 || tops.0 > tops.1 {
                return None;
            }
            prepared
                .search(frame, &integral, lefts, tops, 1)
                .into_iter()
                .next()
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Template images keyed by their path relative to the asset directory.
pub struct TemplateStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<GrayImage>>>,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    /// Loads a template as grayscale. A missing file is a configuration defect
    /// and reported as [`AutomationError::TemplateNotFound`].
    pub async fn load(&self, key: &str) -> Result<Arc<GrayImage>, AutomationError> {
        if let Some(template) = self.cache.lock().await.get(key) {
            return Ok(template.clone());
        }
        let path = self.path_of(key);
        if !path.is_file() {
            return Err(AutomationError::TemplateNotFound(path.display().to_string()));
        }
        let template = Arc::new(image::open(&path)?.to_luma8());
        self.cache
            .lock()
            .await
            .insert(key.to_string(), template.clone());
        Ok(template)
    }
}

/// Locates templates on the live screen of one instance.
#[derive(Clone)]
pub struct VisualMatcher {
    capture: ScreenCapture,
    templates: Arc<TemplateStore>,
}

impl VisualMatcher {
    pub fn new(capture: ScreenCapture, templates: Arc<TemplateStore>) -> Self {
        Self { capture, templates }
    }

    pub fn capture(&self) -> &ScreenCapture {
        &self.capture
    }

    /// Captures a fresh frame and returns it without matching.
    pub async fn snapshot(&self) -> Result<ScreenFrame, AutomationError> {
        self.capture.capture().await
    }

    /// Captures a frame and searches it for `key`. The frame is written to
    /// the instance's working screenshot path as a side effect.
    #[instrument(level = "debug", skip(self))]
    pub async fn locate(&self, key: &str, threshold: f32) -> Result<MatchResult, AutomationError> {
        let template = self.templates.load(key).await?;
        let (tw, th) = template.dimensions();
        let frame = self.capture.capture().await?;
        let gray = frame.load_gray()?;

        let placement = tokio::task::spawn_blocking(move || match_template(&gray, &template))
            .await
            .map_err(|e| AutomationError::Internal(format!("Task join error: {e}")))?;

        let Some(placement) = placement else {
            debug!("Template '{key}' does not fit the captured frame");
            return Ok(MatchResult::miss(0.0));
        };

        if placement.score >= threshold {
            let x = placement.left + tw / 2;
            let y = placement.top + th / 2;
            info!(
                "Located '{key}' at ({x}, {y}) with confidence {:.2}",
                placement.score
            );
            Ok(MatchResult {
                found: true,
                x,
                y,
                confidence: placement.score,
            })
        } else {
            debug!(
                "Near miss for '{key}': confidence {:.2} below {threshold:.2}",
                placement.score
            );
            Ok(MatchResult::miss(placement.score))
        }
    }
}
