pub mod stage;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use stage::{RecognitionOutcome, TextRecognitionStage};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// GPU or NPU backed inference.
    Accelerated,
    /// Plain CPU inference.
    Standard,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Accelerated => "accelerated",
            ExecutionMode::Standard => "standard",
        }
    }
}

/// Where a recognizer currently stands. `Loading` and `Unavailable` are kept
/// apart so a slow model load is never mistaken for a failed one.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "state", content = "detail")]
pub enum RecognizerStatus {
    Loading,
    Ready(ExecutionMode),
    Unavailable(String),
}

/// A loaded text-recognition model.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Generates text for one encoded still image. An empty string means
    /// nothing legible was found.
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Loads recognizers on demand.
#[async_trait]
pub trait RecognizerProvider: Send + Sync {
    async fn load(&self, mode: ExecutionMode) -> Result<Arc<dyn TextRecognizer>>;
}
