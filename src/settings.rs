use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::barcode::Symbology;
use crate::camera::FacingHint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BarcodeSettings {
    pub sample_rate_hz: u32,
    pub symbologies: Vec<Symbology>,
}

impl Default for BarcodeSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            symbologies: Symbology::RETAIL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    pub facing: FacingHint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Try the hardware-accelerated execution mode before the standard one.
    pub prefer_accelerated: bool,
    pub timeout_secs: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            prefer_accelerated: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Preferred language suffix for localized product fields.
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://world.openfoodfacts.org".into(),
            language: "it".into(),
            timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerSettings {
    /// Words that introduce a lot code in printed text, matched case-insensitively.
    pub lot_markers: Vec<String>,
    pub barcode: BarcodeSettings,
    pub camera: CameraSettings,
    pub recognition: RecognitionSettings,
    pub lookup: LookupSettings,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            lot_markers: vec!["lotto".into(), "lot".into(), "l".into()],
            barcode: BarcodeSettings::default(),
            camera: CameraSettings::default(),
            recognition: RecognitionSettings::default(),
            lookup: LookupSettings::default(),
        }
    }
}

/// JSON-backed settings file.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {err}", path.display());
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> ScannerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ScannerSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: ScannerSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ScannerSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScannerSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
