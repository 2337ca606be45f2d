//! Capture surface, live capture handles and the recorder that buffers them.

use async_trait::async_trait;

use crate::error::CaptureError;
use crate::settings::Settings;

/// What a session asks the capture surface for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub audio: bool,
}

impl From<&Settings> for CaptureConstraints {
    fn from(settings: &Settings) -> Self {
        Self {
            width: settings.resolution_tier.capture_width(),
            audio: settings.record_audio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Data(Vec<u8>),
    /// The recorder flushed its last chunk; no further events follow.
    Finalized,
}

/// Source of capture handles.
#[async_trait]
pub trait CaptureSurface: Send {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live capture source. Its tracks stay open until `stop_tracks`.
pub trait CaptureStream: Send {
    /// Builds the recorder for this stream. Only one recorder per stream.
    fn recorder(&mut self) -> Result<Box<dyn MediaRecorder>, CaptureError>;

    /// Releases every track. Must be safe to call more than once.
    fn stop_tracks(&mut self);

    fn is_live(&self) -> bool;
}

/// Buffers an encoded stream into chunks once started.
#[async_trait]
pub trait MediaRecorder: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Asks the recorder to flush and finalize. Idempotent and non-blocking; the
    /// remaining data and `Finalized` arrive through `next_event`.
    fn stop(&mut self);

    fn state(&self) -> RecorderState;

    /// Next buffered event. `None` once the recorder has nothing more to report.
    async fn next_event(&mut self) -> Option<RecorderEvent>;
}
