//! ffmpeg-backed capture surface, recorder and transcoding engine.

mod capture;
mod command;
mod engine;

pub use capture::{FfmpegCaptureSurface, FfmpegRecorder, FfmpegStream};
pub use command::{CaptureInput, FfmpegCommandBuilder};
pub use engine::FfmpegEngine;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How long a released capture process gets to exit on its own before it is killed.
pub(crate) const EXIT_GRACE: Duration = Duration::from_secs(10);
const STDERR_TAIL_LINES: usize = 20;

/// Last lines ffmpeg printed on stderr, kept for error reports.
#[derive(Clone, Default)]
pub(crate) struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub(crate) fn joined(&self) -> String {
        self.0.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Logs ffmpeg stderr in the background, keeping the tail for diagnostics.
///
/// The returned task ends once ffmpeg closes stderr; await it before reading
/// the tail of a process that has exited.
pub(crate) fn forward_stderr(stderr: ChildStderr) -> (StderrTail, JoinHandle<()>) {
    let tail = StderrTail::default();
    let sink = tail.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains("ERROR") || line.contains("error") || line.contains("denied") {
                error!("ffmpeg: {}", line);
            } else if line.contains("Stream") || line.contains("Input") || line.contains("Output") {
                info!("ffmpeg: {}", line);
            } else {
                debug!("ffmpeg: {}", line);
            }
            sink.push(line);
        }
    });
    (tail, reader)
}

/// Waits for a process to exit, force killing it once `grace` has passed.
pub(crate) async fn reap(mut child: Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!("ffmpeg exited with status: {:?}", status),
        Ok(Err(e)) => {
            error!("Error waiting for ffmpeg: {}", e);
            let _ = child.kill().await;
        }
        Err(_) => {
            info!("ffmpeg didn't exit within {}ms, force killing process", grace.as_millis());
            let _ = child.kill().await;
        }
    }
}

/// Reaps `child` in the background, or kills it outright when no runtime is around.
pub(crate) fn spawn_reap(mut child: Child, grace: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(reap(child, grace));
        }
        Err(_) => {
            if let Err(e) = child.start_kill() {
                error!("Failed to kill ffmpeg: {}", e);
            }
        }
    }
}

/// Find ffmpeg executable in common locations
pub fn find_ffmpeg() -> Option<PathBuf> {
    if let Ok(p) = which::which("ffmpeg") {
        return Some(p);
    }
    let candidates = [
        "/opt/homebrew/bin/ffmpeg",      // Homebrew (Apple Silicon)
        "/usr/local/bin/ffmpeg",         // Homebrew (Intel)
        "/opt/local/bin/ffmpeg",         // MacPorts
        "/usr/bin/ffmpeg",
        "C:\\ffmpeg\\bin\\ffmpeg.exe",
    ];
    for c in candidates {
        let pb = PathBuf::from(c);
        if pb.exists() {
            return Some(pb);
        }
    }
    None
}
