use thiserror::Error;

/// Errors raised while driving an emulator instance.
///
/// Expected UI conditions (an element that has not appeared yet, a dialog that
/// is absent) are reported through return values, not through this type.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Timed out waiting for template: {0}")]
    MatchTimeout(String),

    #[error("Input dispatch failed: {0}")]
    InputDispatchFailed(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    /// Whether the failure came from the shell or control transport and may
    /// succeed if the command is issued again.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AutomationError::TransportFailure(_)
                | AutomationError::InputDispatchFailed(_)
                | AutomationError::CaptureFailed(_)
        )
    }
}
