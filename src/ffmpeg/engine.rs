use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::transcode::TranscodeEngine;

/// Runs ffmpeg against files in a private scratch directory.
///
/// Loading creates the directory, unloading removes it together with every
/// file a job left behind.
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    workdir: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path, workdir: None }
    }

    fn dir(&self) -> Result<&Path, EngineError> {
        self.workdir.as_ref().map(TempDir::path).ok_or(EngineError::NotLoaded)
    }

    fn file(&self, name: &str) -> Result<PathBuf, EngineError> {
        Ok(self.dir()?.join(checked_name(name)?))
    }
}

/// Working files are plain names inside the scratch directory.
fn checked_name(name: &str) -> Result<&str, EngineError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('-')
        || name.contains(['/', '\\']);
    if invalid {
        return Err(EngineError::InvalidFileName(name.to_string()));
    }
    Ok(name)
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn is_loaded(&self) -> bool {
        self.workdir.is_some()
    }

    async fn load(&mut self) -> Result<(), EngineError> {
        if !self.ffmpeg_path.exists() && which::which(&self.ffmpeg_path).is_err() {
            return Err(EngineError::Load(format!("ffmpeg not found at {}", self.ffmpeg_path.display())));
        }
        let dir = tempfile::Builder::new()
            .prefix("screenrec-")
            .tempdir()
            .map_err(|e| EngineError::Load(e.to_string()))?;
        debug!("Engine workdir {}", dir.path().display());
        self.workdir = Some(dir);
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), EngineError> {
        if let Some(dir) = self.workdir.take() {
            dir.close()?;
        }
        Ok(())
    }

    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let path = self.file(name)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn run(&mut self, args: &[String]) -> Result<(), EngineError> {
        let dir = self.dir()?.to_path_buf();
        info!("Running ffmpeg {}", args.join(" "));
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .current_dir(&dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Run(format!("failed to spawn ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(EngineError::Run(format!("ffmpeg exited with {}: {}", output.status, tail.join(" | "))));
        }
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.file(name)?;
        Ok(tokio::fs::read(&path).await?)
    }
}
