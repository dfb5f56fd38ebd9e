use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CaptureError;
use crate::extraction::{ExtractionResult, IsoDate};
use crate::sink::CaptureRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStage {
    #[default]
    BarcodeCapture,
    TextCapture,
    Review,
}

impl CaptureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStage::BarcodeCapture => "BarcodeCapture",
            CaptureStage::TextCapture => "TextCapture",
            CaptureStage::Review => "Review",
        }
    }

    /// Stages that hold a camera while live.
    pub fn uses_camera(&self) -> bool {
        !matches!(self, CaptureStage::Review)
    }
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

/// How a stage produced its value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EntrySource {
    Live,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    pub barcode: bool,
    pub text: bool,
}

/// State of one capture attempt, from the first barcode frame to the
/// confirmed record.
///
/// The stage only moves forward on a completed or skipped stage, and only
/// moves back through [`CaptureSession::retry`]. In `Review` the barcode is
/// always non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub id: String,
    pub status: WorkflowStatus,
    pub stage: CaptureStage,
    pub barcode: Option<String>,
    pub lot: Option<String>,
    pub expiry_date: Option<IsoDate>,
    pub raw_recognized_text: Option<String>,
    pub barcode_source: Option<EntrySource>,
    pub text_source: Option<EntrySource>,
    pub started_at: DateTime<Utc>,
    /// Bumped on every stage entry or exit. Asynchronous results carry the
    /// epoch they were started under and are dropped if it moved on.
    #[serde(skip)]
    pub epoch: u64,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: WorkflowStatus::Active,
            stage: CaptureStage::BarcodeCapture,
            barcode: None,
            lot: None,
            expiry_date: None,
            raw_recognized_text: None,
            barcode_source: None,
            text_source: None,
            started_at: Utc::now(),
            epoch: 0,
        }
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    pub fn manual_override(&self) -> ManualOverride {
        ManualOverride {
            barcode: self.barcode_source == Some(EntrySource::Manual),
            text: self.text_source == Some(EntrySource::Manual),
        }
    }

    pub(crate) fn bump_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }

    fn require(&self, stages: &[CaptureStage], action: &'static str) -> Result<(), CaptureError> {
        match self.status {
            WorkflowStatus::Active if stages.contains(&self.stage) => Ok(()),
            WorkflowStatus::Active => Err(CaptureError::invalid(self.stage, action)),
            WorkflowStatus::Completed => Err(CaptureError::invalid("Completed", action)),
            WorkflowStatus::Cancelled => Err(CaptureError::invalid("Cancelled", action)),
        }
    }

    /// `BarcodeCapture -> TextCapture`.
    pub fn record_barcode(&mut self, code: &str, source: EntrySource) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::BarcodeCapture], "record a barcode")?;
        let code = code.trim();
        if code.is_empty() {
            return Err(CaptureError::EmptyBarcode);
        }

        self.barcode = Some(code.to_string());
        self.barcode_source = Some(source);
        self.stage = CaptureStage::TextCapture;
        self.bump_epoch();
        Ok(())
    }

    /// `TextCapture -> Review`, seeding lot and expiry from the extraction.
    pub fn record_text(&mut self, text: &str, extraction: ExtractionResult) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::TextCapture], "record recognized text")?;

        self.raw_recognized_text = Some(text.to_string());
        self.lot = extraction.lot;
        self.expiry_date = extraction.expiry_date;
        self.text_source = Some(EntrySource::Live);
        self.stage = CaptureStage::Review;
        self.bump_epoch();
        Ok(())
    }

    /// `TextCapture -> Review` without recognition. Fields typed in while in
    /// the text stage are kept.
    pub fn skip_text(&mut self) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::TextCapture], "skip text capture")?;

        self.text_source = Some(EntrySource::Manual);
        self.stage = CaptureStage::Review;
        self.bump_epoch();
        Ok(())
    }

    /// Explicit step back to `target`, discarding only what that stage owns.
    ///
    /// Allowed from `Review` to either capture stage, and from `TextCapture`
    /// back to `BarcodeCapture`.
    pub fn retry(&mut self, target: CaptureStage) -> Result<(), CaptureError> {
        let allowed: &[CaptureStage] = match target {
            CaptureStage::BarcodeCapture => &[CaptureStage::TextCapture, CaptureStage::Review],
            CaptureStage::TextCapture => &[CaptureStage::Review],
            CaptureStage::Review => &[],
        };
        self.require(allowed, "retry a stage")?;

        match target {
            CaptureStage::BarcodeCapture => {
                self.barcode = None;
                self.barcode_source = None;
            }
            CaptureStage::TextCapture => {
                self.lot = None;
                self.expiry_date = None;
                self.raw_recognized_text = None;
                self.text_source = None;
            }
            CaptureStage::Review => {}
        }

        self.stage = target;
        self.bump_epoch();
        Ok(())
    }

    pub fn set_barcode(&mut self, code: &str) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::Review], "edit the barcode")?;
        let code = code.trim();
        if code.is_empty() {
            return Err(CaptureError::EmptyBarcode);
        }
        if self.barcode.as_deref() != Some(code) {
            self.barcode = Some(code.to_string());
            self.barcode_source = Some(EntrySource::Manual);
        }
        Ok(())
    }

    pub fn set_lot(&mut self, lot: Option<&str>) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::TextCapture, CaptureStage::Review], "edit the lot")?;
        self.lot = lot
            .map(str::trim)
            .filter(|lot| !lot.is_empty())
            .map(str::to_string);
        Ok(())
    }

    pub fn set_expiry_date(&mut self, date: Option<IsoDate>) -> Result<(), CaptureError> {
        self.require(
            &[CaptureStage::TextCapture, CaptureStage::Review],
            "edit the expiry date",
        )?;
        self.expiry_date = date;
        Ok(())
    }

    pub fn to_record(&self) -> Result<CaptureRecord, CaptureError> {
        self.require(&[CaptureStage::Review], "confirm")?;
        let barcode = self
            .barcode
            .clone()
            .filter(|code| !code.is_empty())
            .ok_or(CaptureError::EmptyBarcode)?;

        Ok(CaptureRecord {
            barcode,
            lot: self.lot.clone(),
            expiry_date: self.expiry_date.clone(),
        })
    }

    pub fn complete(&mut self) -> Result<(), CaptureError> {
        self.require(&[CaptureStage::Review], "complete")?;
        self.status = WorkflowStatus::Completed;
        self.bump_epoch();
        Ok(())
    }

    /// Returns `false` if the session had already finished.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = WorkflowStatus::Cancelled;
        self.bump_epoch();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::extract;

    fn in_review() -> CaptureSession {
        let mut session = CaptureSession::new();
        session.record_barcode("8001234567890", EntrySource::Live).expect("barcode");
        session
            .record_text("LOTTO L99 SCAD 01/01/26", extract("LOTTO L99 SCAD 01/01/26"))
            .expect("text");
        session
    }

    #[test]
    fn forward_path_seeds_fields() {
        let session = in_review();
        assert_eq!(session.stage, CaptureStage::Review);
        assert_eq!(session.barcode.as_deref(), Some("8001234567890"));
        assert_eq!(session.lot.as_deref(), Some("L99"));
        assert_eq!(session.expiry_date.as_ref().map(IsoDate::as_str), Some("2026-01-01"));
        assert_eq!(session.raw_recognized_text.as_deref(), Some("LOTTO L99 SCAD 01/01/26"));
        assert_eq!(session.manual_override(), ManualOverride::default());
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let mut session = CaptureSession::new();
        assert!(matches!(
            session.skip_text(),
            Err(CaptureError::InvalidTransition { .. })
        ));
        assert!(session.to_record().is_err());
        assert!(session.record_text("x", ExtractionResult::default()).is_err());
        assert_eq!(session.stage, CaptureStage::BarcodeCapture);
    }

    #[test]
    fn empty_barcode_never_reaches_review() {
        let mut session = CaptureSession::new();
        assert!(matches!(
            session.record_barcode("  ", EntrySource::Manual),
            Err(CaptureError::EmptyBarcode)
        ));
        assert_eq!(session.stage, CaptureStage::BarcodeCapture);

        let mut session = in_review();
        assert!(session.set_barcode("").is_err());
        assert_eq!(session.barcode.as_deref(), Some("8001234567890"));
    }

    #[test]
    fn skipping_text_marks_manual_override() {
        let mut session = CaptureSession::new();
        session.record_barcode("123", EntrySource::Manual).expect("barcode");
        session.skip_text().expect("skip");

        assert_eq!(session.stage, CaptureStage::Review);
        assert!(session.lot.is_none());
        assert!(session.expiry_date.is_none());
        assert_eq!(
            session.manual_override(),
            ManualOverride {
                barcode: true,
                text: true
            }
        );
    }

    #[test]
    fn retry_text_discards_only_text_fields() {
        let mut session = in_review();
        session.retry(CaptureStage::TextCapture).expect("retry");

        assert_eq!(session.stage, CaptureStage::TextCapture);
        assert_eq!(session.barcode.as_deref(), Some("8001234567890"));
        assert!(session.lot.is_none());
        assert!(session.expiry_date.is_none());
        assert!(session.raw_recognized_text.is_none());
    }

    #[test]
    fn retry_barcode_discards_only_barcode() {
        let mut session = in_review();
        session.retry(CaptureStage::BarcodeCapture).expect("retry");

        assert_eq!(session.stage, CaptureStage::BarcodeCapture);
        assert!(session.barcode.is_none());
        assert_eq!(session.lot.as_deref(), Some("L99"));
    }

    #[test]
    fn retry_rules() {
        let mut session = CaptureSession::new();
        assert!(session.retry(CaptureStage::BarcodeCapture).is_err());

        session.record_barcode("1", EntrySource::Live).expect("barcode");
        assert!(session.retry(CaptureStage::TextCapture).is_err());
        session.retry(CaptureStage::BarcodeCapture).expect("back to barcode");

        let mut session = in_review();
        assert!(session.retry(CaptureStage::Review).is_err());
    }

    #[test]
    fn every_transition_moves_the_epoch() {
        let mut session = CaptureSession::new();
        let start = session.epoch;
        session.record_barcode("1", EntrySource::Live).expect("barcode");
        let after_barcode = session.epoch;
        session.skip_text().expect("skip");
        assert!(after_barcode > start);
        assert!(session.epoch > after_barcode);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut session = in_review();
        session.complete().expect("complete");
        assert_eq!(session.status, WorkflowStatus::Completed);
        assert!(!session.cancel());
        assert!(session.set_lot(Some("X")).is_err());

        let mut session = CaptureSession::new();
        assert!(session.cancel());
        assert!(!session.cancel());
        assert!(session.record_barcode("1", EntrySource::Live).is_err());
    }

    #[test]
    fn record_carries_three_fields() {
        let session = in_review();
        let record = session.to_record().expect("record");
        assert_eq!(
            record,
            CaptureRecord {
                barcode: "8001234567890".into(),
                lot: Some("L99".into()),
                expiry_date: Some(IsoDate::from_parts("01", "01", "26")),
            }
        );
    }

    #[test]
    fn lot_edits_trim_and_clear() {
        let mut session = in_review();
        session.set_lot(Some("  L100 ")).expect("edit");
        assert_eq!(session.lot.as_deref(), Some("L100"));
        session.set_lot(Some("")).expect("clear");
        assert!(session.lot.is_none());
    }
}
