use thiserror::Error;

/// Failures surfaced by the capture pipeline.
///
/// Hardware and model failures (`DeviceUnavailable`, `RecognitionUnavailable`)
/// are caught at the stage boundary and turned into a manual-entry fallback.
/// `NoTextDetected` and `RecognitionFailed` are per-attempt and leave the stage
/// running. `DecodeNoise` never leaves the barcode sampler.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera already acquired by another stage")]
    CameraBusy,

    #[error("video stream already released")]
    StreamReleased,

    #[error("text recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("no text detected in captured frame")]
    NoTextDetected,

    #[error("text recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("frame decode noise: {0}")]
    DecodeNoise(String),

    #[error("cannot {action} while in {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("barcode must not be empty")]
    EmptyBarcode,

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("record rejected by store: {0}")]
    RecordRejected(String),
}

impl CaptureError {
    pub(crate) fn invalid(from: impl std::fmt::Display, action: &'static str) -> Self {
        CaptureError::InvalidTransition {
            from: from.to_string(),
            action,
        }
    }

    /// Whether the condition can be resolved by trying the same stage again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::NoTextDetected
                | CaptureError::RecognitionFailed(_)
                | CaptureError::DecodeNoise(_)
        )
    }

    /// Whether the stage should drop to manual entry.
    pub fn requires_manual_fallback(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceUnavailable(_)
                | CaptureError::CameraBusy
                | CaptureError::RecognitionUnavailable(_)
        )
    }
}
