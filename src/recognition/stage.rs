use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{info, warn};
use tokio::time::{self, Duration};

use crate::camera::FrameSource;
use crate::error::CaptureError;
use crate::settings::RecognitionSettings;

use super::{ExecutionMode, RecognizerProvider, TextRecognizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Recognized(String),
    /// A previous request is still outstanding; the trigger was ignored.
    Busy,
}

/// One still frame in, one text string out.
///
/// Clones share the in-flight flag, so at most one recognition request runs
/// per stage no matter how many callers hold it.
#[derive(Clone)]
pub struct TextRecognitionStage {
    recognizer: Arc<dyn TextRecognizer>,
    in_flight: Arc<AtomicBool>,
    timeout: Duration,
}

impl TextRecognitionStage {
    /// Loads a recognizer, trying the accelerated mode first when preferred
    /// and quietly falling back to the standard mode.
    pub async fn initialize(
        provider: &dyn RecognizerProvider,
        settings: &RecognitionSettings,
    ) -> Result<Self, CaptureError> {
        let modes: &[ExecutionMode] = if settings.prefer_accelerated {
            &[ExecutionMode::Accelerated, ExecutionMode::Standard]
        } else {
            &[ExecutionMode::Standard]
        };

        let mut failures = Vec::new();
        for &mode in modes {
            match provider.load(mode).await {
                Ok(recognizer) => {
                    info!("text recognizer ready ({})", recognizer.mode().as_str());
                    return Ok(Self::with_recognizer(
                        recognizer,
                        Duration::from_secs(settings.timeout_secs.max(1)),
                    ));
                }
                Err(err) => {
                    warn!("text recognizer failed to load in {} mode: {err:#}", mode.as_str());
                    failures.push(format!("{}: {err}", mode.as_str()));
                }
            }
        }

        Err(CaptureError::RecognitionUnavailable(failures.join("; ")))
    }

    pub fn with_recognizer(recognizer: Arc<dyn TextRecognizer>, timeout: Duration) -> Self {
        Self {
            recognizer,
            in_flight: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.recognizer.mode()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Takes one frame from `source` and runs recognition on it.
    ///
    /// Returns [`RecognitionOutcome::Busy`] without touching the camera when a
    /// request is already outstanding. Blank output is
    /// [`CaptureError::NoTextDetected`]; model errors and timeouts are
    /// [`CaptureError::RecognitionFailed`]. Both are retryable.
    pub async fn capture(&self, source: &FrameSource) -> Result<RecognitionOutcome, CaptureError> {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            return Ok(RecognitionOutcome::Busy);
        };

        let frame = source.grab().map_err(|err| match err {
            released @ CaptureError::StreamReleased => released,
            other => CaptureError::RecognitionFailed(other.to_string()),
        })?;

        let sequence = frame.sequence;
        let png = tokio::task::spawn_blocking(move || frame.encode_png())
            .await
            .map_err(|err| CaptureError::RecognitionFailed(format!("encoder worker failed: {err}")))?
            .map_err(|err| CaptureError::RecognitionFailed(format!("{err:#}")))?;

        info!("submitting frame {} ({} bytes) for recognition", sequence, png.len());

        let text = time::timeout(self.timeout, self.recognizer.recognize(&png))
            .await
            .map_err(|_| {
                CaptureError::RecognitionFailed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| CaptureError::RecognitionFailed(format!("{err:#}")))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(CaptureError::NoTextDetected);
        }
        Ok(RecognitionOutcome::Recognized(text.to_string()))
    }
}

/// Clears the in-flight flag when dropped, including when the request future
/// is abandoned mid-way.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
