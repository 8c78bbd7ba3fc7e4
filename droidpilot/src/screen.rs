//! Screen frame capture and failure evidence.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, instrument};

use crate::errors::AutomationError;
use crate::platforms::DeviceShell;

/// A captured screen, stored on disk.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub instance_id: u32,
    pub path: PathBuf,
    pub captured_at: DateTime<Local>,
}

impl ScreenFrame {
    pub fn load_gray(&self) -> Result<image::GrayImage, AutomationError> {
        Ok(image::open(&self.path)?.to_luma8())
    }

    pub fn load_rgba(&self) -> Result<image::RgbaImage, AutomationError> {
        Ok(image::open(&self.path)?.to_rgba8())
    }

    /// Content hash of the frame file.
    pub async fn hash(&self) -> Result<blake3::Hash, AutomationError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(blake3::hash(&bytes))
    }
}

/// Captures frames for one instance. Working frames overwrite a single
/// per-instance file; evidence frames get their own timestamped file.
#[derive(Clone)]
pub struct ScreenCapture {
    shell: Arc<dyn DeviceShell>,
    instance_id: u32,
    screens_dir: PathBuf,
    errors_dir: PathBuf,
}

impl ScreenCapture {
    pub fn new(
        shell: Arc<dyn DeviceShell>,
        instance_id: u32,
        screens_dir: impl Into<PathBuf>,
        errors_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shell,
            instance_id,
            screens_dir: screens_dir.into(),
            errors_dir: errors_dir.into(),
        }
    }

    pub fn working_path(&self) -> PathBuf {
        self.screens_dir
            .join(format!("screen_{}.png", self.instance_id))
    }

    /// Captures into the per-instance working file.
    pub async fn capture(&self) -> Result<ScreenFrame, AutomationError> {
        let path = self.working_path();
        self.capture_to(&path).await
    }

    async fn capture_to(&self, path: &Path) -> Result<ScreenFrame, AutomationError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.shell.capture_screen(self.instance_id, path).await?;
        Ok(ScreenFrame {
            instance_id: self.instance_id,
            path: path.to_path_buf(),
            captured_at: Local::now(),
        })
    }

    /// Captures a timestamped frame into the evidence directory.
    #[instrument(level = "debug", skip(self))]
    pub async fn capture_evidence(&self, label: &str) -> Result<ScreenFrame, AutomationError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.errors_dir.join(format!(
            "ERR_{}_{}_{timestamp}.png",
            self.instance_id,
            sanitize_label(label)
        ));
        let frame = self.capture_to(&path).await?;
        error!("Saved failure screenshot: {}", frame.path.display());
        Ok(frame)
    }
}

/// Template keys may carry directories and extensions (`ui/close.png`);
/// evidence file names keep only the stem with separators flattened.
fn sanitize_label(label: &str) -> String {
    let stem = Path::new(label)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| label.to_string());
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::sanitize_label;

    #[test]
    fn evidence_labels_are_file_safe() {
        assert_eq!(sanitize_label("ui/close_x.png"), "close_x");
        assert_eq!(sanitize_label("home screen.PNG"), "home_screen");
        assert_eq!(sanitize_label("plain"), "plain");
    }
}
