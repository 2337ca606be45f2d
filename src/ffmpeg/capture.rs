use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, error, info, warn};

use super::command::{CaptureInput, FfmpegCommandBuilder};
use super::{forward_stderr, spawn_reap, EXIT_GRACE};
use crate::capture::{CaptureConstraints, CaptureStream, CaptureSurface, MediaRecorder, RecorderEvent, RecorderState};
use crate::error::CaptureError;

const READ_CHUNK: usize = 256 * 1024;
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// Opens the screen through ffmpeg, one hold process per acquisition.
///
/// Acquisition only proves the devices can be grabbed. Encoding starts in a
/// second process once the recorder is started, so nothing captured before
/// that point ends up in the recording.
pub struct FfmpegCaptureSurface {
    ffmpeg_path: PathBuf,
    input: CaptureInput,
    audio_device: Option<String>,
    fps: u32,
    bitrate_kbps: u32,
    settle: Duration,
    exit_grace: Duration,
}

impl FfmpegCaptureSurface {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            input: CaptureInput::platform_default(),
            audio_device: None,
            fps: 30,
            bitrate_kbps: 4000,
            settle: Duration::from_millis(500),
            exit_grace: EXIT_GRACE,
        }
    }

    pub fn with_input(mut self, input: CaptureInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_audio_device(mut self, device: Option<String>) -> Self {
        self.audio_device = device;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_bitrate_kbps(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    /// How long ffmpeg gets to fail before a grab counts as acquired.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// How long a released process may take to quit before it is killed.
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    fn audio_for(&self, constraints: &CaptureConstraints) -> Result<Option<String>, CaptureError> {
        if !constraints.audio {
            return Ok(None);
        }
        self.audio_device
            .clone()
            .or_else(|| self.input.default_audio_device().map(str::to_string))
            .map(Some)
            .ok_or_else(|| CaptureError::SourceUnavailable(format!("no audio device configured for {}", self.input)))
    }
}

/// Permission problems and missing devices both surface as an early exit.
fn classify_exit(status: ExitStatus, diagnostics: String) -> CaptureError {
    let lower = diagnostics.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied(diagnostics)
    } else {
        CaptureError::SourceUnavailable(format!("ffmpeg exited with {}: {}", status, diagnostics))
    }
}

#[async_trait]
impl CaptureSurface for FfmpegCaptureSurface {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let audio = self.audio_for(constraints)?;
        let command = FfmpegCommandBuilder::new(self.ffmpeg_path.clone(), self.input.clone(), constraints.width)
            .fps(self.fps)
            .bitrate_kbps(self.bitrate_kbps)
            .audio_device(audio);

        let mut cmd = command.build_hold();
        info!("Executing ffmpeg command: {:?}", cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("{}: {}", self.ffmpeg_path.display(), e)))?;
        let stderr = child.stderr.take().map(forward_stderr);

        // ffmpeg fails fast when the grab device is refused or missing
        tokio::time::sleep(self.settle).await;
        if let Some(status) = child.try_wait()? {
            error!("ffmpeg capture exited during startup: {}", status);
            let diagnostics = match stderr {
                Some((tail, reader)) => {
                    if tokio::time::timeout(STDERR_DRAIN, reader).await.is_err() {
                        warn!("ffmpeg stderr still open after exit");
                    }
                    tail.joined()
                }
                None => String::new(),
            };
            return Err(classify_exit(status, diagnostics));
        }

        let quit = QuitSignal::new(child.stdin.take());
        info!("Capturing {} at width {}", self.input, constraints.width);
        Ok(Box::new(FfmpegStream {
            hold: Some(child),
            quit,
            encoder: Some(command),
            exit_grace: self.exit_grace,
        }))
    }
}

/// Asks ffmpeg to finish by writing `q` to its stdin, at most once.
#[derive(Clone)]
struct QuitSignal(Arc<Mutex<Option<ChildStdin>>>);

impl QuitSignal {
    fn new(stdin: Option<ChildStdin>) -> Self {
        Self(Arc::new(Mutex::new(stdin)))
    }

    fn send(&self) {
        let Some(mut stdin) = self.0.lock().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = stdin.write_all(b"q").await {
                        debug!("ffmpeg stdin already closed: {}", e);
                    }
                    let _ = stdin.shutdown().await;
                });
            }
            // dropping stdin closes the pipe, which ffmpeg also treats as the end
            Err(_) => drop(stdin),
        }
    }
}

/// Live grab devices. Tracks end when the hold process is released.
pub struct FfmpegStream {
    hold: Option<Child>,
    quit: QuitSignal,
    encoder: Option<FfmpegCommandBuilder>,
    exit_grace: Duration,
}

impl CaptureStream for FfmpegStream {
    fn recorder(&mut self) -> Result<Box<dyn MediaRecorder>, CaptureError> {
        let command = self
            .encoder
            .take()
            .ok_or(CaptureError::RecorderState("already attached to this stream"))?;
        Ok(Box::new(FfmpegRecorder::new(command, self.quit.clone(), self.exit_grace)))
    }

    fn stop_tracks(&mut self) {
        let Some(child) = self.hold.take() else {
            return;
        };
        self.quit.send();
        spawn_reap(child, self.exit_grace);
    }

    fn is_live(&self) -> bool {
        self.hold.is_some()
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Runs the encoding ffmpeg from `start` and reads its webm output.
pub struct FfmpegRecorder {
    command: FfmpegCommandBuilder,
    hold: QuitSignal,
    exit_grace: Duration,
    encoder: Option<Child>,
    quit: QuitSignal,
    stdout: Option<ChildStdout>,
    state: RecorderState,
    finalized: bool,
}

impl FfmpegRecorder {
    fn new(command: FfmpegCommandBuilder, hold: QuitSignal, exit_grace: Duration) -> Self {
        Self {
            command,
            hold,
            exit_grace,
            encoder: None,
            quit: QuitSignal::new(None),
            stdout: None,
            state: RecorderState::Inactive,
            finalized: false,
        }
    }

    fn release_encoder(&mut self) {
        self.quit.send();
        if let Some(child) = self.encoder.take() {
            spawn_reap(child, self.exit_grace);
        }
    }
}

#[async_trait]
impl MediaRecorder for FfmpegRecorder {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != RecorderState::Inactive {
            return Err(CaptureError::RecorderState("already started"));
        }
        // the hold process lets go of the devices before the encoder takes them
        self.hold.send();

        let mut cmd = self.command.build();
        info!("Executing ffmpeg command: {:?}", cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("encoder: {}", e)))?;
        if let Some(stderr) = child.stderr.take() {
            let _ = forward_stderr(stderr);
        }
        self.stdout = child.stdout.take();
        self.quit = QuitSignal::new(child.stdin.take());
        self.encoder = Some(child);
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == RecorderState::Recording {
            self.release_encoder();
        }
        self.state = RecorderState::Stopped;
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    async fn next_event(&mut self) -> Option<RecorderEvent> {
        if self.finalized {
            return None;
        }
        let stdout = self.stdout.as_mut()?;
        let mut buf = vec![0u8; READ_CHUNK];
        match stdout.read(&mut buf).await {
            Ok(0) => {
                debug!("ffmpeg closed its output");
                self.finalized = true;
                self.state = RecorderState::Stopped;
                Some(RecorderEvent::Finalized)
            }
            Ok(n) => {
                buf.truncate(n);
                Some(RecorderEvent::Data(buf))
            }
            Err(e) => {
                warn!("Reading ffmpeg output failed: {}", e);
                self.finalized = true;
                self.state = RecorderState::Stopped;
                Some(RecorderEvent::Finalized)
            }
        }
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.release_encoder();
    }
}
