//! Camera acquisition and release.

use serde::Serialize;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Requested frame size when the caller has no preference.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Description of an acquired stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// A camera the session can acquire for the duration of an active session.
///
/// `acquire` may suspend and may fail. `release` must be safe to call when
/// nothing is held.
pub trait MediaSource: Send + Sync + 'static {
    fn acquire(&self) -> impl Future<Output = Result<StreamInfo, MediaError>> + Send;
    fn release(&self);
}

/// Camera backed by a device node such as `/dev/video0`.
///
/// Acquisition opens the node read-only and keeps the handle until release,
/// so a permission or presence problem surfaces at start time.
pub struct DeviceCamera {
    path: PathBuf,
    width: u32,
    height: u32,
    handle: Mutex<Option<std::fs::File>>,
}

impl DeviceCamera {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            handle: Mutex::new(None),
        }
    }

    fn map_open_error(&self, err: std::io::Error) -> MediaError {
        let device = self.path.display().to_string();
        match err.kind() {
            ErrorKind::NotFound => MediaError::DeviceNotFound(device),
            ErrorKind::PermissionDenied => MediaError::PermissionDenied(device),
            _ if err.raw_os_error() == Some(EBUSY) => MediaError::DeviceBusy,
            _ => MediaError::Unavailable(format!("{device}: {err}")),
        }
    }
}

/// `EBUSY` on Linux and the BSDs.
const EBUSY: i32 = 16;

impl MediaSource for DeviceCamera {
    async fn acquire(&self) -> Result<StreamInfo, MediaError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| self.map_open_error(e))?;
        let file = file.into_std().await;

        let mut guard = self
            .handle
            .lock()
            .map_err(|_| MediaError::Unavailable("camera handle lock poisoned".into()))?;
        if guard.is_some() {
            return Err(MediaError::DeviceBusy);
        }
        *guard = Some(file);

        let device = self.path.display().to_string();
        tracing::info!(
            device = %device,
            width = self.width,
            height = self.height,
            "camera acquired"
        );
        Ok(StreamInfo {
            device,
            width: self.width,
            height: self.height,
        })
    }

    fn release(&self) {
        let released = match self.handle.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if released {
            tracing::info!(device = %self.path.display(), "camera released");
        }
    }
}

#[derive(Default)]
struct SimulatedState {
    unavailable: AtomicBool,
    held: AtomicBool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

/// In-process camera that always has a frame ready.
///
/// Clones share state, so a test can keep one clone to flip availability
/// and inspect acquire/release counts while the engine owns another.
#[derive(Clone)]
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    latency: Duration,
    state: Arc<SimulatedState>,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            latency: Duration::ZERO,
            state: Arc::default(),
        }
    }

    /// Delay every acquisition by `latency`, like a permission prompt would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent acquisitions fail as if permission were denied.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.state.held.load(Ordering::SeqCst)
    }

    /// Number of successful acquisitions.
    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of releases that freed a held stream.
    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
    }
}

impl MediaSource for SimulatedCamera {
    async fn acquire(&self) -> Result<StreamInfo, MediaError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("simulated".into()));
        }
        if self.state.held.swap(true, Ordering::SeqCst) {
            return Err(MediaError::DeviceBusy);
        }
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(width = self.width, height = self.height, "simulated camera acquired");
        Ok(StreamInfo {
            device: "simulated".into(),
            width: self.width,
            height: self.height,
        })
    }

    fn release(&self) {
        if self.state.held.swap(false, Ordering::SeqCst) {
            self.state.releases.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("simulated camera released");
        }
    }
}
