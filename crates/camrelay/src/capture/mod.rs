//! Camera capture sessions
//!
//! A [`CaptureBackend`] opens one [`CaptureSession`] per camera. The session
//! hands out decoded frames until the source runs dry, at which point
//! `next_frame` returns `None`. An empty read is a soft failure: the owner is
//! expected to close the session and open a fresh one.

pub mod gst;

use async_trait::async_trait;
use thiserror::Error;

use crate::camera::CameraAddress;

pub use gst::GstCapture;

/// A decoded RGB24 frame, tightly packed (no row padding)
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
    pub sequence: u32,
}

impl Frame {
    /// Bytes per row
    pub fn step(&self) -> u32 {
        self.width * 3
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Errors opening a capture session
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("GStreamer error: {0}")]
    GStreamer(#[from] gstreamer::glib::Error),
    #[error("GStreamer state change error: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),
    #[error("Failed to get element by name")]
    ElementNotFound,
    #[error("Failed to downcast pipeline")]
    DowncastError,
    #[error("Source did not start within {0:?}")]
    Timeout(std::time::Duration),
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Opens capture sessions. Shared read-only between workers.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    type Session: CaptureSession + 'static;

    async fn open(&self, camera: &CameraAddress) -> Result<Self::Session, OpenError>;
}

/// A live decode session bound to one camera
#[async_trait]
pub trait CaptureSession: Send {
    /// Wait for the next decoded frame. `None` means the source delivered
    /// nothing (end of stream, read error or stall).
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Release decode resources. Idempotent.
    fn close(&mut self);
}
