use std::sync::Arc;

use log::{info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::camera::{CameraResourceManager, FacingHint, MediaCaptureHandle};
use crate::error::CaptureError;
use crate::settings::BarcodeSettings;

use super::sampler::sampling_loop;
use super::{BarcodeDecoder, DecodedSymbol, Symbology, TorchOutcome};

/// Shortest gap between two sampled frames, whatever rate is configured.
pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Turns a live video stream into one barcode string.
#[derive(Clone)]
pub struct BarcodeDetectionStage {
    decoder: Arc<dyn BarcodeDecoder>,
    accept: Arc<[Symbology]>,
    period: Duration,
    verbose: bool,
}

impl BarcodeDetectionStage {
    pub fn new(decoder: Arc<dyn BarcodeDecoder>, settings: &BarcodeSettings) -> Self {
        let rate = settings.sample_rate_hz.max(1);
        let accept: Vec<Symbology> = if settings.symbologies.is_empty() {
            Symbology::RETAIL.to_vec()
        } else {
            settings.symbologies.clone()
        };

        Self {
            decoder,
            accept: Arc::from(accept),
            period: Duration::from_secs_f64(1.0 / f64::from(rate)).max(MIN_SAMPLE_PERIOD),
            verbose: crate::utils::env_flag("LOTSCAN_DEBUG"),
        }
    }

    pub fn sampling_period(&self) -> Duration {
        self.period
    }

    /// Starts sampling frames from `handle`. The returned scan owns the handle
    /// until it is stopped or dropped.
    pub fn start(&self, handle: MediaCaptureHandle, parent: &CancellationToken) -> BarcodeScan {
        let cancel_token = parent.child_token();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            Arc::clone(&self.decoder),
            Arc::clone(&self.accept),
            self.period,
            self.verbose,
            cancel_token.clone(),
            tx,
        ));

        info!(
            "barcode scan started on handle {} ({} symbologies, every {}ms)",
            handle.id(),
            self.accept.len(),
            self.period.as_millis()
        );

        BarcodeScan {
            handle: Some(handle),
            cancel_token,
            task: Some(task),
            result: Some(rx),
            torch_on: false,
        }
    }

    /// Acquires a camera, scans until a barcode is read or `cancel` fires, and
    /// releases the camera on every path.
    pub async fn detect(
        &self,
        camera: &CameraResourceManager,
        facing: FacingHint,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CaptureError> {
        let handle = camera.acquire(facing).await?;
        let mut scan = self.start(handle, cancel);

        let detected = tokio::select! {
            symbol = scan.next_detection() => symbol.map(|symbol| symbol.text),
            _ = cancel.cancelled() => None,
        };

        scan.stop().await;
        Ok(detected)
    }

    /// Manual fallback: validates operator-typed text. No camera involved.
    pub fn manual(text: &str) -> Result<String, CaptureError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CaptureError::EmptyBarcode);
        }
        Ok(trimmed.to_string())
    }
}

/// A running barcode scan holding the stage's camera handle.
pub struct BarcodeScan {
    handle: Option<MediaCaptureHandle>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
    result: Option<oneshot::Receiver<DecodedSymbol>>,
    torch_on: bool,
}

impl BarcodeScan {
    /// Waits for the decoded symbol. `None` once the scan was stopped, or if
    /// the result was already handed out.
    pub async fn next_detection(&mut self) -> Option<DecodedSymbol> {
        let rx = self.result.take()?;
        rx.await.ok()
    }

    /// Detaches the result channel so another task can wait on it without
    /// holding the scan.
    pub fn take_receiver(&mut self) -> Option<oneshot::Receiver<DecodedSymbol>> {
        self.result.take()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn toggle_torch(&mut self) -> TorchOutcome {
        let Some(handle) = self.handle.as_ref() else {
            return TorchOutcome::Unsupported;
        };
        if !handle.torch_supported() {
            return TorchOutcome::Unsupported;
        }

        let next = !self.torch_on;
        match handle.set_torch(next) {
            Ok(()) => {
                self.torch_on = next;
                if next {
                    TorchOutcome::On
                } else {
                    TorchOutcome::Off
                }
            }
            Err(err) => {
                warn!("torch toggle failed: {err:#}");
                TorchOutcome::Unsupported
            }
        }
    }

    /// Cancels sampling and releases the camera right away, without waiting
    /// for the sampler task to wind down.
    pub fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        self.result = None;
    }

    /// Like [`shutdown`](Self::shutdown) but also joins the sampler task.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("barcode sampler task failed to join: {err}");
            }
        }
    }
}

impl Drop for BarcodeScan {
    fn drop(&mut self) {
        self.shutdown();
    }
}
