//! Hands finished files to the user.

use async_trait::async_trait;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::DeliveryError;

/// Receives every produced file: the raw capture and each transcoded output.
#[async_trait]
pub trait FileSink: Send {
    async fn deliver(&mut self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError>;
}

/// A file that landed in the download folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub name: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Writes deliveries into a folder, like a browser's download directory.
///
/// Existing files are never overwritten; a ` (n)` suffix is added instead.
/// The folder can be changed between deliveries through [`DownloadDir::shared_dir`].
pub struct DownloadDir {
    dir: Arc<Mutex<PathBuf>>,
    notify: Option<Sender<Delivered>>,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Arc::new(Mutex::new(dir.into())), notify: None }
    }

    /// The user's download folder, falling back to the working directory.
    pub fn default_dir() -> PathBuf {
        dirs::download_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn with_notifier(mut self, notify: Sender<Delivered>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.lock().clone()
    }

    pub fn shared_dir(&self) -> Arc<Mutex<PathBuf>> {
        self.dir.clone()
    }

    fn target_path(dir: &Path, name: &str) -> Result<PathBuf, DeliveryError> {
        let sanitized = sanitize_filename::sanitize_with_options(
            name,
            sanitize_filename::Options { truncate: true, ..Default::default() },
        );
        if sanitized.is_empty() {
            return Err(DeliveryError::InvalidName(name.to_string()));
        }

        let candidate = dir.join(&sanitized);
        if !candidate.exists() {
            return Ok(candidate);
        }

        let (stem, ext) = match sanitized.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (sanitized.clone(), String::new()),
        };
        let mut n = 1;
        loop {
            let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
            if !candidate.exists() {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl FileSink for DownloadDir {
    async fn deliver(&mut self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError> {
        let dir = self.dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = Self::target_path(&dir, name)?;
        tokio::fs::write(&path, bytes).await?;
        info!("Saved {} ({} bytes) -> {}", name, bytes.len(), path.display());

        if let Some(notify) = &self.notify {
            let _ = notify.send(Delivered { name: name.to_string(), path, size: bytes.len() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = DownloadDir::new(dir.path().join("downloads")).with_notifier(tx);

        sink.deliver("screen_recording.mp4", b"first").await.unwrap();
        sink.deliver("screen_recording.mp4", b"second").await.unwrap();
        sink.deliver("screen_recording.mp4", b"third").await.unwrap();

        let base = dir.path().join("downloads");
        assert_eq!(std::fs::read(base.join("screen_recording.mp4")).unwrap(), b"first");
        assert_eq!(std::fs::read(base.join("screen_recording (1).mp4")).unwrap(), b"second");
        assert_eq!(std::fs::read(base.join("screen_recording (2).mp4")).unwrap(), b"third");

        let notes: Vec<Delivered> = rx.try_iter().collect();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[1].size, 6);
        assert_eq!(notes[1].path, base.join("screen_recording (1).mp4"));
    }

    #[tokio::test]
    async fn test_names_cannot_escape_the_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DownloadDir::new(dir.path());

        sink.deliver("../escape.webm", b"x").await.unwrap();

        assert!(!dir.path().parent().unwrap().join("escape.webm").exists());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_folder_change_applies_to_next_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DownloadDir::new(dir.path().join("a"));
        let shared = sink.shared_dir();

        sink.deliver("screen_recording.webm", b"1").await.unwrap();
        *shared.lock() = dir.path().join("b");
        sink.deliver("screen_recording.webm", b"2").await.unwrap();

        assert_eq!(sink.dir(), dir.path().join("b"));
        assert!(dir.path().join("a/screen_recording.webm").exists());
        assert!(dir.path().join("b/screen_recording.webm").exists());
    }
}
