//! Lot code and expiry date extraction from recognized text.
//!
//! Pure string processing with no camera or model dependency. The two
//! searches are independent; either or both may come back empty, which is a
//! normal result and not an error.

pub mod date;
pub mod lot;

use std::sync::OnceLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use date::{find_date, IsoDate};
pub use lot::LotPattern;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub lot: Option<String>,
    pub expiry_date: Option<IsoDate>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.lot.is_none() && self.expiry_date.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    lot: LotPattern,
}

impl FieldExtractor {
    pub fn new<S: AsRef<str>>(lot_markers: &[S]) -> Result<Self> {
        Ok(Self {
            lot: LotPattern::new(lot_markers)?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractionResult {
        ExtractionResult {
            lot: self.lot.find(text).map(str::to_string),
            expiry_date: find_date(text),
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        default_extractor().clone()
    }
}

fn default_extractor() -> &'static FieldExtractor {
    static DEFAULT: OnceLock<FieldExtractor> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        FieldExtractor::new(&["lotto", "lot", "l"]).expect("default lot markers are valid")
    })
}

/// Extracts with the default Italian/English marker vocabulary.
pub fn extract(text: &str) -> ExtractionResult {
    default_extractor().extract(text)
}
