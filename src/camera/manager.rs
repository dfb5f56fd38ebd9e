use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::CaptureError;

use super::{CameraBackend, FacingHint, Frame, VideoStream};

type ActiveSlot = Arc<Mutex<Option<Uuid>>>;

fn lock_slot(slot: &Mutex<Option<Uuid>>) -> MutexGuard<'_, Option<Uuid>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hands out at most one live camera stream at a time.
///
/// The camera is an exclusively-owned, non-reentrant resource: a second
/// `acquire` while a handle is live fails with [`CaptureError::CameraBusy`].
#[derive(Clone)]
pub struct CameraResourceManager {
    backend: Arc<dyn CameraBackend>,
    active: ActiveSlot,
}

impl CameraResourceManager {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn acquire(&self, facing: FacingHint) -> Result<MediaCaptureHandle, CaptureError> {
        // Reserve the slot before awaiting the platform so two callers can't
        // both get through; the reservation is undone if the open fails or
        // the future is dropped.
        let reservation = Reservation::claim(&self.active)?;

        let stream = self
            .backend
            .open_stream(facing)
            .await
            .map_err(|err| CaptureError::DeviceUnavailable(format!("{err:#}")))?;

        let id = reservation.commit();
        info!(
            "camera acquired: handle={} stream={} facing={}",
            id,
            stream.id(),
            facing.as_str()
        );

        Ok(MediaCaptureHandle {
            inner: Arc::new(HandleInner {
                id,
                stream,
                released: AtomicBool::new(false),
                slot: self.active.clone(),
            }),
        })
    }

    /// Stops the handle's stream. Calling it again is a no-op. Returns whether
    /// this call did the stopping.
    pub fn release(&self, handle: &MediaCaptureHandle) -> bool {
        handle.release()
    }

    /// Runs `f` with a freshly acquired camera and releases it afterwards on
    /// every path: success, error, or the returned future being dropped.
    pub async fn with_camera<T, F, Fut>(&self, facing: FacingHint, f: F) -> Result<T, CaptureError>
    where
        F: FnOnce(FrameSource) -> Fut,
        Fut: Future<Output = Result<T, CaptureError>>,
    {
        let handle = self.acquire(facing).await?;
        let result = f(handle.frame_source()).await;
        handle.release();
        result
    }

    pub fn is_busy(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    /// Stops every stream the backend still knows about. Used on teardown to
    /// catch streams orphaned by an abrupt exit.
    pub fn sweep(&self) -> usize {
        let stopped = self.backend.stop_all();
        if stopped > 0 {
            warn!("camera sweep stopped {} orphaned stream(s)", stopped);
            *lock_slot(&self.active) = None;
        }
        stopped
    }
}

struct Reservation<'a> {
    slot: &'a Mutex<Option<Uuid>>,
    id: Uuid,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn claim(slot: &'a Mutex<Option<Uuid>>) -> Result<Self, CaptureError> {
        let mut guard = lock_slot(slot);
        if guard.is_some() {
            return Err(CaptureError::CameraBusy);
        }
        let id = Uuid::new_v4();
        *guard = Some(id);
        Ok(Self {
            slot,
            id,
            committed: false,
        })
    }

    fn commit(mut self) -> Uuid {
        self.committed = true;
        self.id
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut guard = lock_slot(self.slot);
            if *guard == Some(self.id) {
                *guard = None;
            }
        }
    }
}

struct HandleInner {
    id: Uuid,
    stream: Arc<dyn VideoStream>,
    released: AtomicBool,
    slot: ActiveSlot,
}

impl HandleInner {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        if self.stream.torch_supported() {
            if let Err(err) = self.stream.set_torch(false) {
                warn!("failed to switch torch off on release: {err:#}");
            }
        }
        self.stream.stop();

        let mut guard = lock_slot(&self.slot);
        if *guard == Some(self.id) {
            *guard = None;
        }
        info!("camera released: handle={}", self.id);
        true
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Exclusive ownership of one live camera stream.
///
/// Not `Clone`: the stage that acquired it is the only owner. Dropping the
/// handle releases the stream.
pub struct MediaCaptureHandle {
    inner: Arc<HandleInner>,
}

impl MediaCaptureHandle {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn release(&self) -> bool {
        self.inner.release()
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    /// Read-only access to frames for worker tasks. The source cannot release
    /// the stream and starts failing once the handle is released.
    pub fn frame_source(&self) -> FrameSource {
        FrameSource {
            inner: self.inner.clone(),
        }
    }

    pub fn torch_supported(&self) -> bool {
        !self.is_released() && self.inner.stream.torch_supported()
    }

    pub fn set_torch(&self, on: bool) -> anyhow::Result<()> {
        if self.is_released() {
            anyhow::bail!("stream already released");
        }
        self.inner.stream.set_torch(on)
    }
}

impl Drop for MediaCaptureHandle {
    fn drop(&mut self) {
        if self.inner.release() {
            debug!("camera handle {} released on drop", self.inner.id);
        }
    }
}

impl std::fmt::Debug for MediaCaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCaptureHandle")
            .field("id", &self.inner.id)
            .field("stream", &self.inner.stream.id())
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Clone)]
pub struct FrameSource {
    inner: Arc<HandleInner>,
}

impl FrameSource {
    pub fn grab(&self) -> Result<Frame, CaptureError> {
        if self.inner.is_released() {
            return Err(CaptureError::StreamReleased);
        }
        self.inner
            .stream
            .grab_frame()
            .map_err(|err| CaptureError::DecodeNoise(format!("frame grab failed: {err:#}")))
    }

    pub fn is_live(&self) -> bool {
        !self.inner.is_released()
    }
}
