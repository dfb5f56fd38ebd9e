pub mod sampler;
pub mod stage;

use serde::{Deserialize, Serialize};

use crate::camera::Frame;
use crate::error::CaptureError;

pub use stage::{BarcodeDetectionStage, BarcodeScan};

/// Barcode symbologies the sampler can be told to accept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Ean13,
    Ean8,
    Code128,
    Code39,
    UpcA,
    UpcE,
    QrCode,
    DataMatrix,
}

impl Symbology {
    /// Retail linear codes found on packaged goods.
    pub const RETAIL: [Symbology; 6] = [
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::UpcA,
        Symbology::UpcE,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbology::Ean13 => "EAN-13",
            Symbology::Ean8 => "EAN-8",
            Symbology::Code128 => "Code 128",
            Symbology::Code39 => "Code 39",
            Symbology::UpcA => "UPC-A",
            Symbology::UpcE => "UPC-E",
            Symbology::QrCode => "QR Code",
            Symbology::DataMatrix => "Data Matrix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSymbol {
    pub symbology: Symbology,
    pub text: String,
}

impl DecodedSymbol {
    pub fn new(symbology: Symbology, text: impl Into<String>) -> Self {
        Self {
            symbology,
            text: text.into(),
        }
    }
}

/// External barcode decoding capability.
///
/// `Ok(None)` means the frame held no symbol. Per-frame failures should come
/// back as [`CaptureError::DecodeNoise`]; the sampler drops them.
pub trait BarcodeDecoder: Send + Sync {
    fn decode(
        &self,
        frame: &Frame,
        accept: &[Symbology],
    ) -> Result<Option<DecodedSymbol>, CaptureError>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TorchOutcome {
    On,
    Off,
    Unsupported,
}
