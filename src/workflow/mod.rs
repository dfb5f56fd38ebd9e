//! The capture workflow: barcode, then label text, then operator review.

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{CaptureServices, CaptureWorkflow, TextCaptureOutcome};
pub use events::{ManualReason, StageMode, WorkflowEvent, WorkflowSnapshot};
pub use state::{CaptureSession, CaptureStage, EntrySource, ManualOverride, WorkflowStatus};
