//! Camera-driven capture of a product's barcode, lot code and expiry date.
//!
//! Platform code plugs in through the capability traits
//! ([`camera::CameraBackend`], [`barcode::BarcodeDecoder`],
//! [`recognition::RecognizerProvider`], [`sink::RecordSink`]); the
//! [`workflow::CaptureWorkflow`] drives them through
//! `BarcodeCapture -> TextCapture -> Review`.

pub mod barcode;
pub mod camera;
pub mod error;
pub mod extraction;
pub mod lookup;
pub mod recognition;
pub mod settings;
pub mod sink;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CaptureError;
pub use extraction::{extract, ExtractionResult, FieldExtractor, IsoDate};
pub use settings::{ScannerSettings, SettingsStore};
pub use sink::{CaptureRecord, RecordSink};
pub use workflow::{CaptureServices, CaptureStage, CaptureWorkflow, WorkflowEvent};

/// Initializes `env_logger` at info level, overridable through `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
