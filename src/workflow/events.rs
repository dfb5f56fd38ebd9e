use serde::Serialize;

use crate::error::CaptureError;
use crate::extraction::ExtractionResult;
use crate::recognition::RecognizerStatus;
use crate::sink::CaptureRecord;

use super::{CaptureSession, CaptureStage, EntrySource, ManualOverride};

/// Why a camera stage is running in manual-entry mode.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum ManualReason {
    /// The operator picked manual entry.
    Chosen,
    DeviceUnavailable(String),
    RecognitionUnavailable(String),
}

impl ManualReason {
    pub(crate) fn from_error(err: &CaptureError) -> Self {
        match err {
            CaptureError::RecognitionUnavailable(detail) => {
                ManualReason::RecognitionUnavailable(detail.clone())
            }
            other => ManualReason::DeviceUnavailable(other.to_string()),
        }
    }
}

/// What the current stage is doing with its camera.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", tag = "kind", content = "reason")]
pub enum StageMode {
    /// No camera work: not started yet, in review, or finished.
    #[default]
    Idle,
    /// Acquiring the camera or loading the recognizer.
    Starting,
    Live,
    Manual(ManualReason),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum WorkflowEvent {
    StageChanged {
        stage: CaptureStage,
        mode: StageMode,
    },
    BarcodeDetected {
        barcode: String,
        source: EntrySource,
    },
    TextRecognized {
        text: String,
        extraction: ExtractionResult,
    },
    NoTextDetected,
    RecognitionFailed {
        reason: String,
    },
    FallbackToManual {
        stage: CaptureStage,
        reason: ManualReason,
    },
    TorchUnavailable,
    Completed {
        record: CaptureRecord,
    },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub session: CaptureSession,
    pub mode: StageMode,
    pub manual_override: ManualOverride,
    pub camera_live: bool,
    /// `None` until a text stage first asks for the recognizer.
    pub recognizer: Option<RecognizerStatus>,
}
