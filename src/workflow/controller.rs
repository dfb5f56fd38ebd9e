use std::sync::{Arc, Mutex as StdMutex, Weak};

use anyhow::Result;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    barcode::{BarcodeDecoder, BarcodeDetectionStage, BarcodeScan, DecodedSymbol, TorchOutcome},
    camera::{CameraResourceManager, MediaCaptureHandle},
    error::CaptureError,
    extraction::{ExtractionResult, FieldExtractor, IsoDate},
    lookup::{ProductInfo, ProductLookup},
    recognition::{RecognitionOutcome, RecognizerProvider, RecognizerStatus, TextRecognitionStage},
    settings::ScannerSettings,
    sink::{CaptureRecord, RecordSink},
};

use super::{
    CaptureSession, CaptureStage, EntrySource, ManualReason, StageMode, WorkflowEvent,
    WorkflowSnapshot,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

/// External capabilities the workflow drives.
#[derive(Clone)]
pub struct CaptureServices {
    pub camera: CameraResourceManager,
    pub decoder: Arc<dyn BarcodeDecoder>,
    pub recognizers: Arc<dyn RecognizerProvider>,
    pub sink: Arc<dyn RecordSink>,
    pub lookup: Arc<dyn ProductLookup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCaptureOutcome {
    /// Text was read; the workflow moved to `Review` with these fields seeded.
    Recognized(ExtractionResult),
    /// Nothing legible; the camera keeps running for another try.
    NoTextDetected,
    /// The attempt failed (model error, timeout); retryable.
    Failed(String),
    /// A previous capture is still running; this trigger did nothing.
    Busy,
    /// The stage has no live camera (still starting, or in manual mode).
    NotReady,
    /// The workflow moved on while recognition ran; the result was dropped.
    Discarded,
}

enum LiveStage {
    None,
    Barcode(BarcodeScan),
    Text {
        handle: MediaCaptureHandle,
        recognizer: TextRecognitionStage,
    },
}

impl LiveStage {
    fn is_live(&self) -> bool {
        !matches!(self, LiveStage::None)
    }

    /// Releases whatever camera the stage holds. Returns whether anything was
    /// released.
    fn shutdown(&mut self) -> bool {
        match std::mem::replace(self, LiveStage::None) {
            LiveStage::None => false,
            LiveStage::Barcode(mut scan) => {
                scan.shutdown();
                true
            }
            LiveStage::Text { handle, .. } => {
                handle.release();
                true
            }
        }
    }
}

struct WorkflowState {
    session: CaptureSession,
    mode: StageMode,
    live: LiveStage,
    /// Cancelled when the stage being entered ends, so a camera open still
    /// waiting on the platform gives up its reservation.
    entry: CancellationToken,
}

impl WorkflowState {
    /// Ends the current stage's camera work, pending or live. Returns whether
    /// a live camera was released.
    fn end_stage(&mut self) -> bool {
        self.entry.cancel();
        self.live.shutdown()
    }
}

/// Everything except the session itself. Background watchers hold this
/// strongly and the session weakly.
struct Shared {
    services: CaptureServices,
    barcode: BarcodeDetectionStage,
    extractor: FieldExtractor,
    settings: ScannerSettings,
    recognizer: Mutex<Option<TextRecognitionStage>>,
    recognizer_status: StdMutex<Option<RecognizerStatus>>,
    /// Held for the whole of a stage entry; a new entry waits for an
    /// abandoned one to drop its camera reservation.
    entry_gate: Mutex<()>,
    events: broadcast::Sender<WorkflowEvent>,
    shutdown_token: CancellationToken,
}

impl Shared {
    fn set_recognizer_status(&self, status: RecognizerStatus) {
        let mut guard = match self.recognizer_status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(status);
    }

    fn recognizer_status(&self) -> Option<RecognizerStatus> {
        match self.recognizer_status.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Drives one capture from barcode to confirmed record.
///
/// Cheap to clone; clones share the same session. At most one stage holds a
/// camera at any time: the previous stage's handle is always released before
/// the next acquisition starts. Results that arrive after the stage they
/// belong to has ended (late decodes, slow recognitions) are dropped.
#[derive(Clone)]
pub struct CaptureWorkflow {
    state: Arc<Mutex<WorkflowState>>,
    shared: Arc<Shared>,
}

struct WeakWorkflow {
    state: Weak<Mutex<WorkflowState>>,
    shared: Arc<Shared>,
}

impl WeakWorkflow {
    fn upgrade(&self) -> Option<CaptureWorkflow> {
        Some(CaptureWorkflow {
            state: self.state.upgrade()?,
            shared: Arc::clone(&self.shared),
        })
    }
}

impl CaptureWorkflow {
    pub fn new(services: CaptureServices, settings: ScannerSettings) -> Result<Self> {
        let extractor = FieldExtractor::new(&settings.lot_markers)?;
        let barcode = BarcodeDetectionStage::new(Arc::clone(&services.decoder), &settings.barcode);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            state: Arc::new(Mutex::new(WorkflowState {
                session: CaptureSession::new(),
                mode: StageMode::Idle,
                live: LiveStage::None,
                entry: CancellationToken::new(),
            })),
            shared: Arc::new(Shared {
                services,
                barcode,
                extractor,
                settings,
                recognizer: Mutex::new(None),
                recognizer_status: StdMutex::new(None),
                entry_gate: Mutex::new(()),
                events,
                shutdown_token: CancellationToken::new(),
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.state.lock().await;
        WorkflowSnapshot {
            manual_override: state.session.manual_override(),
            camera_live: state.live.is_live(),
            mode: state.mode.clone(),
            recognizer: self.shared.recognizer_status(),
            session: state.session.clone(),
        }
    }

    /// Opens the camera for barcode detection. A missing or denied camera is
    /// not an error here: the stage drops to manual entry and the returned
    /// mode says so.
    pub async fn start(&self) -> Result<StageMode, CaptureError> {
        {
            let state = self.state.lock().await;
            if !state.session.is_active() || state.session.stage != CaptureStage::BarcodeCapture {
                return Err(CaptureError::invalid(state.session.stage, "start"));
            }
            if state.mode != StageMode::Idle {
                return Ok(state.mode.clone());
            }
        }
        Ok(self.enter_stage().await)
    }

    /// Operator-typed barcode. Stops any live scan without waiting for it.
    pub async fn submit_manual_barcode(&self, code: &str) -> Result<StageMode, CaptureError> {
        let code = BarcodeDetectionStage::manual(code)?;
        {
            let mut state = self.state.lock().await;
            state.session.record_barcode(&code, EntrySource::Manual)?;
            state.end_stage();
            state.mode = StageMode::Starting;
            log_info!("barcode entered manually: {}", code);
            self.emit(WorkflowEvent::BarcodeDetected {
                barcode: code,
                source: EntrySource::Manual,
            });
        }
        Ok(self.enter_stage().await)
    }

    /// Drops the current camera stage to manual entry.
    pub async fn switch_to_manual(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock().await;
        if !state.session.is_active() || !state.session.stage.uses_camera() {
            return Err(CaptureError::invalid(state.session.stage, "switch to manual entry"));
        }

        state.end_stage();
        state.session.bump_epoch();
        state.mode = StageMode::Manual(ManualReason::Chosen);
        let stage = state.session.stage;
        self.emit(WorkflowEvent::StageChanged {
            stage,
            mode: state.mode.clone(),
        });
        Ok(())
    }

    /// Leaves manual entry and brings the camera back for the current stage.
    pub async fn resume_live(&self) -> Result<StageMode, CaptureError> {
        {
            let mut state = self.state.lock().await;
            if !state.session.is_active() || !state.session.stage.uses_camera() {
                return Err(CaptureError::invalid(state.session.stage, "resume live capture"));
            }
            if !matches!(state.mode, StageMode::Manual(_)) {
                return Ok(state.mode.clone());
            }
            state.session.bump_epoch();
        }
        Ok(self.enter_stage().await)
    }

    pub async fn toggle_torch(&self) -> TorchOutcome {
        let mut state = self.state.lock().await;
        let outcome = match &mut state.live {
            LiveStage::Barcode(scan) => scan.toggle_torch(),
            _ => TorchOutcome::Unsupported,
        };
        if outcome == TorchOutcome::Unsupported {
            self.emit(WorkflowEvent::TorchUnavailable);
        }
        outcome
    }

    /// Captures one still frame and runs recognition on it.
    pub async fn capture_text(&self) -> Result<TextCaptureOutcome, CaptureError> {
        let (epoch, recognizer, source) = {
            let state = self.state.lock().await;
            if !state.session.is_active() || state.session.stage != CaptureStage::TextCapture {
                return Err(CaptureError::invalid(state.session.stage, "capture text"));
            }
            match &state.live {
                LiveStage::Text { handle, recognizer } => {
                    (state.session.epoch, recognizer.clone(), handle.frame_source())
                }
                _ => return Ok(TextCaptureOutcome::NotReady),
            }
        };

        let result = recognizer.capture(&source).await;

        let mut state = self.state.lock().await;
        if state.session.epoch != epoch || !state.session.is_active() {
            log_info!("discarding recognition result for a stage that already ended");
            return Ok(TextCaptureOutcome::Discarded);
        }

        match result {
            Ok(RecognitionOutcome::Busy) => Ok(TextCaptureOutcome::Busy),
            Ok(RecognitionOutcome::Recognized(text)) => {
                state.end_stage();
                let extraction = self.shared.extractor.extract(&text);
                if let Some(date) = extraction.expiry_date.as_ref().filter(|d| !d.is_calendar_valid()) {
                    log_warn!("extracted expiry date {} is not a real calendar date", date);
                }
                state.session.record_text(&text, extraction.clone())?;
                state.mode = StageMode::Idle;

                log_info!(
                    "text recognized: lot={:?} expiry={:?}",
                    extraction.lot,
                    extraction.expiry_date.as_ref().map(IsoDate::as_str)
                );
                self.emit(WorkflowEvent::TextRecognized {
                    text,
                    extraction: extraction.clone(),
                });
                self.emit(WorkflowEvent::StageChanged {
                    stage: CaptureStage::Review,
                    mode: StageMode::Idle,
                });
                Ok(TextCaptureOutcome::Recognized(extraction))
            }
            Err(CaptureError::NoTextDetected) => {
                self.emit(WorkflowEvent::NoTextDetected);
                Ok(TextCaptureOutcome::NoTextDetected)
            }
            Err(err) if err.is_retryable() => {
                log_warn!("text capture attempt failed: {err}");
                let reason = err.to_string();
                self.emit(WorkflowEvent::RecognitionFailed {
                    reason: reason.clone(),
                });
                Ok(TextCaptureOutcome::Failed(reason))
            }
            Err(err) => {
                // Anything not worth retrying means the camera is gone.
                log_error!("text capture lost its camera: {err}");
                state.end_stage();
                let reason = ManualReason::from_error(&err);
                state.mode = StageMode::Manual(reason.clone());
                self.emit(WorkflowEvent::FallbackToManual {
                    stage: CaptureStage::TextCapture,
                    reason,
                });
                Ok(TextCaptureOutcome::NotReady)
            }
        }
    }

    /// Moves to `Review` without recognition.
    pub async fn skip_text_capture(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock().await;
        state.session.skip_text()?;
        state.end_stage();
        state.mode = StageMode::Idle;
        self.emit(WorkflowEvent::StageChanged {
            stage: CaptureStage::Review,
            mode: StageMode::Idle,
        });
        Ok(())
    }

    pub async fn set_barcode(&self, code: &str) -> Result<(), CaptureError> {
        self.state.lock().await.session.set_barcode(code)
    }

    pub async fn set_lot(&self, lot: Option<&str>) -> Result<(), CaptureError> {
        self.state.lock().await.session.set_lot(lot)
    }

    /// `None` or a blank string clears the date; anything else must be a
    /// valid `YYYY-MM-DD` date.
    pub async fn set_expiry_date(&self, date: Option<&str>) -> Result<(), CaptureError> {
        let date = match date.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => Some(IsoDate::parse(value)?),
            None => None,
        };
        self.state.lock().await.session.set_expiry_date(date)
    }

    /// Explicit step back to `target`. The current stage's camera is released
    /// before the target stage acquires its own.
    pub async fn retry_stage(&self, target: CaptureStage) -> Result<StageMode, CaptureError> {
        {
            let mut state = self.state.lock().await;
            state.session.retry(target)?;
            state.end_stage();
            state.mode = StageMode::Starting;
            log_info!("retrying {}", target);
        }
        Ok(self.enter_stage().await)
    }

    /// Hands the finished record to the record store and completes the
    /// workflow. If the store rejects it the workflow stays in `Review`.
    pub async fn confirm(&self) -> Result<CaptureRecord, CaptureError> {
        let mut state = self.state.lock().await;
        let record = state.session.to_record()?;

        self.shared.services
            .sink
            .submit(record.clone())
            .await
            .map_err(|err| CaptureError::RecordRejected(format!("{err:#}")))?;

        state.session.complete()?;
        state.mode = StageMode::Idle;
        log_info!("capture {} completed for {}", state.session.id, record.barcode);
        self.emit(WorkflowEvent::Completed {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Cancels from any state. Safe to call repeatedly; calls after the first,
    /// or after completion, do nothing.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        if !state.session.cancel() {
            return;
        }
        let released = state.end_stage();
        state.mode = StageMode::Idle;
        log_info!(
            "capture {} cancelled in {} (camera released: {})",
            state.session.id,
            state.session.stage,
            released
        );
        self.emit(WorkflowEvent::Cancelled);
    }

    /// Cancels, stops background work and sweeps any stream left running.
    pub async fn teardown(&self) {
        self.cancel().await;
        self.shared.shutdown_token.cancel();
        self.shared.services.camera.sweep();
    }

    /// Looks up product metadata for the captured barcode. Never fails; see
    /// [`ProductLookup`].
    pub async fn lookup_product(&self) -> Option<ProductInfo> {
        let barcode = self.state.lock().await.session.barcode.clone()?;
        if !self.shared.settings.lookup.enabled {
            return Some(ProductInfo::empty(&barcode));
        }
        Some(self.shared.services.lookup.lookup(&barcode).await)
    }

    fn emit(&self, event: WorkflowEvent) {
        let _ = self.shared.events.send(event);
    }

    fn downgrade(&self) -> WeakWorkflow {
        WeakWorkflow {
            state: Arc::downgrade(&self.state),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Brings up the camera (and recognizer) for the current stage.
    ///
    /// Acquisition runs outside the state lock so cancellation is never
    /// blocked on slow hardware. Ending the stage while the camera is still
    /// opening abandons the open; a handle that arrives after the stage moved
    /// on is released straight away.
    async fn enter_stage(&self) -> StageMode {
        let _gate = self.shared.entry_gate.lock().await;

        let (epoch, stage, entry) = {
            let mut state = self.state.lock().await;
            if !state.session.is_active() {
                return state.mode.clone();
            }
            if !state.session.stage.uses_camera() {
                state.mode = StageMode::Idle;
                let mode = state.mode.clone();
                self.emit(WorkflowEvent::StageChanged {
                    stage: state.session.stage,
                    mode: mode.clone(),
                });
                return mode;
            }
            state.mode = StageMode::Starting;
            state.entry = self.shared.shutdown_token.child_token();
            (state.session.epoch, state.session.stage, state.entry.clone())
        };

        let facing = self.shared.settings.camera.facing;
        let acquire = async {
            tokio::select! {
                biased;
                _ = entry.cancelled() => None,
                acquired = self.shared.services.camera.acquire(facing) => Some(acquired),
            }
        };
        let (acquired, recognizer) = match stage {
            CaptureStage::TextCapture => {
                let (acquired, recognizer) = tokio::join!(acquire, self.load_recognizer());
                (acquired, Some(recognizer))
            }
            _ => (acquire.await, None),
        };

        let mut state = self.state.lock().await;
        let acquired = match acquired {
            Some(acquired) if state.session.epoch == epoch && state.session.is_active() => acquired,
            abandoned => {
                if let Some(Ok(handle)) = abandoned {
                    handle.release();
                }
                log_info!("stage {} ended before its camera came up", stage);
                return state.mode.clone();
            }
        };

        let live = match (acquired, recognizer) {
            (Ok(handle), None) => {
                let mut scan = self.shared.barcode.start(handle, &entry);
                if let Some(rx) = scan.take_receiver() {
                    self.spawn_barcode_watcher(epoch, rx, scan.cancel_token().clone());
                }
                Ok(LiveStage::Barcode(scan))
            }
            (Ok(handle), Some(Ok(recognizer))) => Ok(LiveStage::Text { handle, recognizer }),
            (Ok(handle), Some(Err(err))) => {
                handle.release();
                Err(err)
            }
            (Err(err), _) => Err(err),
        };

        match live {
            Ok(live) => {
                state.live = live;
                state.mode = StageMode::Live;
            }
            Err(err) => {
                if err.requires_manual_fallback() {
                    log_warn!("{} falling back to manual entry: {}", stage, err);
                } else {
                    log_error!("{} could not start: {}", stage, err);
                }
                let reason = ManualReason::from_error(&err);
                state.mode = StageMode::Manual(reason.clone());
                self.emit(WorkflowEvent::FallbackToManual { stage, reason });
            }
        }

        let mode = state.mode.clone();
        self.emit(WorkflowEvent::StageChanged {
            stage,
            mode: mode.clone(),
        });
        mode
    }

    /// Loads the recognizer once per workflow; later text stages reuse it.
    async fn load_recognizer(&self) -> Result<TextRecognitionStage, CaptureError> {
        let mut cached = self.shared.recognizer.lock().await;
        if let Some(stage) = cached.as_ref() {
            return Ok(stage.clone());
        }

        self.shared.set_recognizer_status(RecognizerStatus::Loading);
        match TextRecognitionStage::initialize(
            &*self.shared.services.recognizers,
            &self.shared.settings.recognition,
        )
        .await
        {
            Ok(stage) => {
                self.shared
                    .set_recognizer_status(RecognizerStatus::Ready(stage.mode()));
                *cached = Some(stage.clone());
                Ok(stage)
            }
            Err(err) => {
                self.shared
                    .set_recognizer_status(RecognizerStatus::Unavailable(err.to_string()));
                Err(err)
            }
        }
    }

    fn spawn_barcode_watcher(
        &self,
        epoch: u64,
        rx: oneshot::Receiver<DecodedSymbol>,
        cancel_token: CancellationToken,
    ) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            let symbol = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return,
                symbol = rx => symbol,
            };
            let Ok(symbol) = symbol else {
                return;
            };
            if let Some(workflow) = weak.upgrade() {
                workflow.on_barcode_detected(epoch, symbol).await;
            }
        });
    }

    /// Applies a decode from the scan started under `epoch`. Late arrivals
    /// for a stage that already ended are dropped.
    pub(crate) async fn on_barcode_detected(&self, epoch: u64, symbol: DecodedSymbol) {
        {
            let mut state = self.state.lock().await;
            if state.session.epoch != epoch || !state.session.is_active() {
                log_info!("discarding late barcode {}", symbol.text);
                return;
            }

            // The sampler stops after emitting, so a rejected decode means a
            // fresh scan.
            state.end_stage();
            if let Err(err) = state.session.record_barcode(&symbol.text, EntrySource::Live) {
                log_warn!("decoded barcode rejected, rescanning: {err}");
                state.session.bump_epoch();
            }
            state.mode = StageMode::Starting;
            if state.session.stage == CaptureStage::TextCapture {
                self.emit(WorkflowEvent::BarcodeDetected {
                    barcode: symbol.text,
                    source: EntrySource::Live,
                });
            }
        }
        self.enter_stage().await;
    }
}
