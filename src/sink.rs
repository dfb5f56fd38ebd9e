use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extraction::IsoDate;

/// The finished result of one capture, handed to the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub barcode: String,
    pub lot: Option<String>,
    pub expiry_date: Option<IsoDate>,
}

/// Record-keeping collaborator. Owns persistence; sees only finished records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn submit(&self, record: CaptureRecord) -> Result<()>;
}
