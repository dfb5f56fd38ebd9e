//! In-memory stand-ins for the camera, decoder, recognizer and record store.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image::RgbImage;

use crate::barcode::{BarcodeDecoder, DecodedSymbol, Symbology};
use crate::camera::{CameraBackend, FacingHint, Frame, VideoStream};
use crate::error::CaptureError;
use crate::recognition::{ExecutionMode, RecognizerProvider, TextRecognizer};
use crate::sink::{CaptureRecord, RecordSink};

pub(crate) struct FakeCamera {
    denied: bool,
    torch: bool,
    torch_stuck: AtomicBool,
    open_delay_ms: AtomicU64,
    opened: AtomicUsize,
    stopped: Arc<AtomicUsize>,
    torch_lit: Arc<AtomicBool>,
    streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeCamera {
    fn build(denied: bool, torch: bool) -> Arc<Self> {
        Arc::new(Self {
            denied,
            torch,
            torch_stuck: AtomicBool::new(false),
            open_delay_ms: AtomicU64::new(0),
            opened: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
            torch_lit: Arc::new(AtomicBool::new(false)),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::build(false, false)
    }

    pub(crate) fn denied() -> Arc<Self> {
        Self::build(true, false)
    }

    pub(crate) fn with_torch() -> Arc<Self> {
        Self::build(false, true)
    }

    pub(crate) fn with_open_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Streams refuse to switch the torch off.
    pub(crate) fn with_stuck_torch(self: Arc<Self>) -> Arc<Self> {
        self.torch_stuck.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn torch_lit(&self) -> bool {
        self.torch_lit.load(Ordering::SeqCst)
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|stream| !stream.is_stopped())
            .count()
    }
}

#[async_trait]
impl CameraBackend for FakeCamera {
    async fn open_stream(&self, _facing: FacingHint) -> Result<Arc<dyn VideoStream>> {
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.denied {
            bail!("permission denied");
        }

        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        let stream = Arc::new(FakeStream {
            id: format!("fake-{index}"),
            torch: self.torch,
            torch_stuck: self.torch_stuck.load(Ordering::SeqCst),
            sequence: AtomicU64::new(0),
            stopped_flag: AtomicBool::new(false),
            stopped: Arc::clone(&self.stopped),
            torch_lit: Arc::clone(&self.torch_lit),
        });
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }

    fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for stream in self.streams.lock().unwrap().iter() {
            if !stream.is_stopped() {
                stream.stop();
                stopped += 1;
            }
        }
        stopped
    }
}

pub(crate) struct FakeStream {
    id: String,
    torch: bool,
    torch_stuck: bool,
    sequence: AtomicU64,
    stopped_flag: AtomicBool,
    stopped: Arc<AtomicUsize>,
    torch_lit: Arc<AtomicBool>,
}

impl FakeStream {
    fn is_stopped(&self) -> bool {
        self.stopped_flag.load(Ordering::SeqCst)
    }
}

impl VideoStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn grab_frame(&self) -> Result<Frame> {
        if self.is_stopped() {
            bail!("stream stopped");
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(sequence, RgbImage::new(8, 8)))
    }

    fn torch_supported(&self) -> bool {
        self.torch
    }

    fn set_torch(&self, on: bool) -> Result<()> {
        if !self.torch {
            bail!("no torch");
        }
        if self.torch_stuck && !on {
            bail!("torch stuck");
        }
        self.torch_lit.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped_flag.swap(true, Ordering::SeqCst) {
            self.torch_lit.store(false, Ordering::SeqCst);
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Yields nothing for the first `after - 1` frames, then the scripted symbol
/// on every frame after that.
pub(crate) struct ScriptedDecoder {
    after: Option<usize>,
    symbol: Option<DecodedSymbol>,
    calls: AtomicUsize,
}

impl ScriptedDecoder {
    pub(crate) fn after(after: usize, symbology: Symbology, text: &str) -> Arc<Self> {
        Arc::new(Self {
            after: Some(after.max(1)),
            symbol: Some(DecodedSymbol::new(symbology, text)),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn never() -> Arc<Self> {
        Arc::new(Self {
            after: None,
            symbol: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BarcodeDecoder for ScriptedDecoder {
    fn decode(
        &self,
        _frame: &Frame,
        _accept: &[Symbology],
    ) -> Result<Option<DecodedSymbol>, CaptureError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.after {
            Some(after) if call >= after => Ok(self.symbol.clone()),
            _ if call % 2 == 0 => Err(CaptureError::DecodeNoise("blurred frame".into())),
            _ => Ok(None),
        }
    }
}

/// Recognizer provider that replays scripted responses in order, repeating
/// the last one once the script runs out.
pub(crate) struct ScriptedProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    last: Arc<Mutex<String>>,
    accelerated: AtomicBool,
    available: bool,
    delay_ms: AtomicU64,
    load_attempts: Mutex<Vec<ExecutionMode>>,
    recognize_calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn build(responses: &[&str], available: bool) -> Arc<Self> {
        Arc::new(Self {
            responses: Arc::new(Mutex::new(
                responses.iter().map(|text| text.to_string()).collect(),
            )),
            last: Arc::new(Mutex::new(String::new())),
            accelerated: AtomicBool::new(true),
            available,
            delay_ms: AtomicU64::new(0),
            load_attempts: Mutex::new(Vec::new()),
            recognize_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn new(responses: &[&str]) -> Arc<Self> {
        Self::build(responses, true)
    }

    pub(crate) fn unavailable() -> Arc<Self> {
        Self::build(&[], false)
    }

    pub(crate) fn without_acceleration(self: Arc<Self>) -> Arc<Self> {
        self.accelerated.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub(crate) fn load_attempts(&self) -> Vec<ExecutionMode> {
        self.load_attempts.lock().unwrap().clone()
    }

    pub(crate) fn recognize_calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognizerProvider for ScriptedProvider {
    async fn load(&self, mode: ExecutionMode) -> Result<Arc<dyn TextRecognizer>> {
        self.load_attempts.lock().unwrap().push(mode);
        if !self.available {
            bail!("model files missing");
        }
        if mode == ExecutionMode::Accelerated && !self.accelerated.load(Ordering::SeqCst) {
            bail!("no accelerator");
        }

        Ok(Arc::new(ScriptedRecognizer {
            mode,
            responses: Arc::clone(&self.responses),
            last: Arc::clone(&self.last),
            delay: Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)),
            calls: Arc::clone(&self.recognize_calls),
        }))
    }
}

struct ScriptedRecognizer {
    mode: ExecutionMode,
    responses: Arc<Mutex<VecDeque<String>>>,
    last: Arc<Mutex<String>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        assert!(!image.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(text) = next {
            *last = text;
        }
        Ok(last.clone())
    }
}

/// Record store that keeps submissions in memory.
pub(crate) struct RecordingSink {
    rejecting: AtomicBool,
    records: Mutex<Vec<CaptureRecord>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            rejecting: AtomicBool::new(false),
            records: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub(crate) fn records(&self) -> Vec<CaptureRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn submit(&self, record: CaptureRecord) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
