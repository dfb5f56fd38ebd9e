pub mod manager;

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

pub use manager::{CameraResourceManager, FrameSource, MediaCaptureHandle};

/// Which physical camera a stage would like to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FacingHint {
    /// Rear camera, pointed away from the operator.
    #[default]
    Environment,
    User,
    Any,
}

impl FacingHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingHint::Environment => "environment",
            FacingHint::User => "user",
            FacingHint::Any => "any",
        }
    }
}

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self { sequence, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encodes the frame as PNG, the still-image format handed to recognizers.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(self.image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .with_context(|| format!("failed to encode frame {} as PNG", self.sequence))?;
        Ok(bytes)
    }
}

/// A live video stream opened by a [`CameraBackend`].
///
/// Implementations wrap whatever the platform hands out (a V4L2 device, an
/// AVFoundation session, a browser `MediaStream`).
pub trait VideoStream: Send + Sync {
    /// Platform identifier of the underlying device or track.
    fn id(&self) -> &str;

    /// Latest frame from the feed.
    fn grab_frame(&self) -> Result<Frame>;

    fn torch_supported(&self) -> bool {
        false
    }

    fn set_torch(&self, _on: bool) -> Result<()> {
        anyhow::bail!("torch not supported by this stream")
    }

    /// Stops every hardware track of the stream. Switches the camera light off.
    fn stop(&self);
}

/// Platform access to camera hardware.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Opens one stream matching the facing hint. Fails when access is denied
    /// or no device matches.
    async fn open_stream(&self, facing: FacingHint) -> Result<Arc<dyn VideoStream>>;

    /// Force-stops any stream the platform still has running, including ones
    /// whose owner vanished without releasing. Returns how many were stopped.
    fn stop_all(&self) -> usize;
}
