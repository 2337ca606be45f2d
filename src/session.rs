//! The single recording session owned by the controller.

use std::fmt;
use tracing::debug;

use crate::capture::{CaptureStream, MediaRecorder, RecorderState};
use crate::settings::Settings;
use crate::transcode::RawRecording;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    CountingDown,
    Recording,
    Stopping,
    Transcoding,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Idle => "Ready",
            SessionStatus::Starting => "Starting…",
            SessionStatus::CountingDown => "Get ready…",
            SessionStatus::Recording => "Recording",
            SessionStatus::Stopping => "Finishing recording…",
            SessionStatus::Transcoding => "Converting…",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Enabled state of the start/stop controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl Controls {
    pub fn for_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Idle => Self { start_enabled: true, stop_enabled: false },
            SessionStatus::CountingDown | SessionStatus::Recording => Self { start_enabled: false, stop_enabled: true },
            _ => Self { start_enabled: false, stop_enabled: false },
        }
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::for_status(SessionStatus::Idle)
    }
}

/// One capture-to-transcode cycle.
///
/// `settings` is the snapshot taken at start; the session never re-reads settings.
pub struct Session {
    pub generation: u64,
    pub status: SessionStatus,
    pub settings: Settings,
    stream: Option<Box<dyn CaptureStream>>,
    recorder: Option<Box<dyn MediaRecorder>>,
    chunks: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(generation: u64, settings: Settings) -> Self {
        Self {
            generation,
            status: SessionStatus::Starting,
            settings,
            stream: None,
            recorder: None,
            chunks: Vec::new(),
        }
    }

    pub fn attach(&mut self, stream: Box<dyn CaptureStream>, recorder: Box<dyn MediaRecorder>) {
        self.stream = Some(stream);
        self.recorder = Some(recorder);
    }

    pub fn recorder_mut(&mut self) -> Option<&mut (dyn MediaRecorder + 'static)> {
        self.recorder.as_deref_mut()
    }

    pub fn has_live_stream(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.is_live())
    }

    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Capture ends here, independent of whatever happens to the data afterwards.
    pub fn release_tracks(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.stop_tracks();
        }
    }

    /// Consumes the buffered chunks into the one raw recording of this session.
    pub fn take_recording(&mut self) -> RawRecording {
        RawRecording::from_chunks(std::mem::take(&mut self.chunks))
    }

    /// Stops a live recorder, releases tracks and drops buffered data.
    pub fn teardown(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            if recorder.state() == RecorderState::Recording {
                recorder.stop();
            }
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
        }
        if !self.chunks.is_empty() {
            debug!("Dropping {} buffered bytes", self.buffered_bytes());
        }
        self.chunks.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("status", &self.status)
            .field("live", &self.has_live_stream())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_mirror_status() {
        assert_eq!(Controls::for_status(SessionStatus::Idle), Controls { start_enabled: true, stop_enabled: false });
        for status in [SessionStatus::CountingDown, SessionStatus::Recording] {
            assert_eq!(Controls::for_status(status), Controls { start_enabled: false, stop_enabled: true });
        }
        for status in [
            SessionStatus::Starting,
            SessionStatus::Stopping,
            SessionStatus::Transcoding,
        ] {
            assert_eq!(Controls::for_status(status), Controls { start_enabled: false, stop_enabled: false });
        }
    }

    #[test]
    fn test_empty_chunks_are_not_buffered() {
        let mut session = Session::new(1, Settings::default());
        session.push_chunk(Vec::new());
        session.push_chunk(b"abc".to_vec());
        assert_eq!(session.buffered_bytes(), 3);
        assert_eq!(session.take_recording().as_bytes(), b"abc");
        assert_eq!(session.buffered_bytes(), 0);
    }
}
