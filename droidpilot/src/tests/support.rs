//! In-memory device and image helpers shared by the unit tests.

use image::{GrayImage, Luma, Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::{InstanceContext, Resolution};
use crate::errors::AutomationError;
use crate::input::InputDispatcher;
use crate::ocr::TextRecognizer;
use crate::platforms::{DeviceShell, InstanceControl, InstanceStatus};
use crate::screen::ScreenCapture;
use crate::vision::{TemplateStore, VisualMatcher};

/// Deterministic blocky noise, so every patch of the image is distinctive.
pub fn pattern(width: u32, height: u32, seed: u32) -> RgbImage {
    let block = 3;
    RgbImage::from_fn(width, height, |x, y| {
        let bx = x / block;
        let by = y / block;
        let mut v = bx
            .wrapping_mul(374_761_393)
            .wrapping_add(by.wrapping_mul(668_265_263))
            .wrapping_add(seed.wrapping_mul(2_246_822_519));
        v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
        let level = ((v >> 16) & 0xff) as u8;
        Rgb([level, level.wrapping_add(40), level.wrapping_mul(3)])
    })
}

pub fn blank(width: u32, height: u32, level: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([level, level, level]))
}

pub fn paste(frame: &RgbImage, patch: &RgbImage, left: u32, top: u32) -> RgbImage {
    let mut out = frame.clone();
    image::imageops::replace(&mut out, patch, i64::from(left), i64::from(top));
    out
}

pub fn gray(image: &RgbImage) -> GrayImage {
    image::DynamicImage::ImageRgb8(image.clone()).to_luma8()
}

pub fn flat_gray(width: u32, height: u32, level: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([level]))
}

/// Stand-in for an emulator instance.
///
/// Captures serve queued frames first, then keep repeating the last one.
/// A frame registered with [`FakeDevice::set_frame_after_tap`] replaces the
/// screen on the next tap.
pub struct FakeDevice {
    resolution: Resolution,
    queued: Mutex<VecDeque<RgbImage>>,
    current: Mutex<RgbImage>,
    after_tap: Mutex<Option<RgbImage>>,
    pub taps: Mutex<Vec<(u32, u32)>>,
    pub swipes: Mutex<Vec<((u32, u32), (u32, u32), u64)>>,
    pub keys: Mutex<Vec<u32>>,
    pub texts: Mutex<Vec<String>>,
    pub captures: AtomicUsize,
    pub app_starts: AtomicUsize,
    pub app_stops: AtomicUsize,
    pub removed: Mutex<Vec<u32>>,
    running: AtomicBool,
    failing_taps: AtomicUsize,
}

impl FakeDevice {
    pub fn new(resolution: Resolution, frame: RgbImage) -> Arc<Self> {
        Arc::new(Self {
            resolution,
            queued: Mutex::new(VecDeque::new()),
            current: Mutex::new(frame),
            after_tap: Mutex::new(None),
            taps: Mutex::new(Vec::new()),
            swipes: Mutex::new(Vec::new()),
            keys: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
            app_starts: AtomicUsize::new(0),
            app_stops: AtomicUsize::new(0),
            removed: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            failing_taps: AtomicUsize::new(0),
        })
    }

    pub fn queue_frames(&self, frames: impl IntoIterator<Item = RgbImage>) {
        self.queued.lock().unwrap().extend(frames);
    }

    pub fn set_frame(&self, frame: RgbImage) {
        *self.current.lock().unwrap() = frame;
    }

    pub fn set_frame_after_tap(&self, frame: RgbImage) {
        *self.after_tap.lock().unwrap() = Some(frame);
    }

    pub fn fail_next_taps(&self, count: usize) {
        self.failing_taps.store(count, Ordering::SeqCst);
    }

    pub fn taps(&self) -> Vec<(u32, u32)> {
        self.taps.lock().unwrap().clone()
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeviceShell for FakeDevice {
    async fn tap(&self, _instance_id: u32, x: u32, y: u32) -> Result<(), AutomationError> {
        let failing = self.failing_taps.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_taps.store(failing - 1, Ordering::SeqCst);
            return Err(AutomationError::TransportFailure("device offline".to_string()));
        }
        self.taps.lock().unwrap().push((x, y));
        if let Some(next) = self.after_tap.lock().unwrap().take() {
            *self.current.lock().unwrap() = next;
        }
        Ok(())
    }

    async fn swipe(
        &self,
        _instance_id: u32,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u64,
    ) -> Result<(), AutomationError> {
        self.swipes.lock().unwrap().push((from, to, duration_ms));
        Ok(())
    }

    async fn key_event(&self, _instance_id: u32, key_code: u32) -> Result<(), AutomationError> {
        self.keys.lock().unwrap().push(key_code);
        Ok(())
    }

    async fn input_text(&self, _instance_id: u32, text: &str) -> Result<(), AutomationError> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn capture_screen(
        &self,
        _instance_id: u32,
        destination: &Path,
    ) -> Result<(), AutomationError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let frame = {
            let mut queued = self.queued.lock().unwrap();
            let mut current = self.current.lock().unwrap();
            if let Some(next) = queued.pop_front() {
                *current = next;
            }
            current.clone()
        };
        frame.save(destination)?;
        Ok(())
    }

    async fn screen_resolution(&self, _instance_id: u32) -> Result<Resolution, AutomationError> {
        Ok(self.resolution)
    }

    async fn start_app(&self, _instance_id: u32, _package: &str) -> Result<(), AutomationError> {
        self.app_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_app(&self, _instance_id: u32, _package: &str) -> Result<(), AutomationError> {
        self.app_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn proxy(&self, _instance_id: u32) -> Result<Option<String>, AutomationError> {
        Ok(None)
    }
}

#[async_trait::async_trait]
impl InstanceControl for FakeDevice {
    async fn start(&self, _instance_id: u32) -> Result<(), AutomationError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _instance_id: u32) -> Result<(), AutomationError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn clone_instance(&self, base_id: u32) -> Result<u32, AutomationError> {
        Ok(base_id + 1)
    }

    async fn remove(&self, instance_id: u32) -> Result<(), AutomationError> {
        self.removed.lock().unwrap().push(instance_id);
        Ok(())
    }

    async fn rename(&self, _instance_id: u32, _title: &str) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceStatus>, AutomationError> {
        Ok(Vec::new())
    }

    async fn is_running(&self, _instance_id: u32) -> Result<bool, AutomationError> {
        Ok(self.running.load(Ordering::SeqCst))
    }
}

/// OCR stand-in that always reads the same text.
pub struct FixedText(pub String);

#[async_trait::async_trait]
impl TextRecognizer for FixedText {
    async fn recognize(&self, _image: &image::RgbaImage) -> Result<String, AutomationError> {
        Ok(self.0.clone())
    }
}

/// Temporary directories laid out like a deployment.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets/ui")).unwrap();
        Self { dir }
    }

    pub fn assets(&self) -> PathBuf {
        self.dir.path().join("assets")
    }

    pub fn screens(&self) -> PathBuf {
        self.dir.path().join("screens")
    }

    pub fn errors(&self) -> PathBuf {
        self.dir.path().join("errors")
    }

    pub fn ledger(&self) -> PathBuf {
        self.dir.path().join("db/runs.json")
    }

    pub fn add_template(&self, key: &str, image: &RgbImage) {
        let path = self.assets().join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image.save(path).unwrap();
    }

    pub fn error_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.errors()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Matcher, dispatcher and context for one fake instance.
pub struct Rig {
    pub device: Arc<FakeDevice>,
    pub context: Arc<InstanceContext>,
    pub capture: ScreenCapture,
    pub matcher: VisualMatcher,
    pub input: InputDispatcher,
}

impl Rig {
    pub fn new(workspace: &Workspace, device: Arc<FakeDevice>, reference: Resolution) -> Self {
        let actual = device.resolution;
        let context = Arc::new(InstanceContext::new(7, reference, actual, "com.example.app").unwrap());
        let shell: Arc<dyn DeviceShell> = device.clone();
        let capture = ScreenCapture::new(shell.clone(), 7, workspace.screens(), workspace.errors());
        let templates = Arc::new(TemplateStore::new(workspace.assets()));
        let matcher = VisualMatcher::new(capture.clone(), templates);
        let input = InputDispatcher::new(shell, context.clone());
        Self {
            device,
            context,
            capture,
            matcher,
            input,
        }
    }
}
