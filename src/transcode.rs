//! Sequential multi-format transcoding of a finished recording.
//!
//! The engine is a single shared instance that cannot run two jobs at once, so
//! every job goes through unload → load → write → run → read → unload before
//! the next one starts. A failing job is logged and skipped; it never stops the
//! remaining formats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::delivery::FileSink;
use crate::error::{EngineError, TranscodeError, UnknownFormat};

/// Stem shared by every delivered file.
pub const RECORDING_STEM: &str = "screen_recording";
/// Name of the untranscoded capture, both as a download and as the engine's input file.
pub const RAW_FILE_NAME: &str = "screen_recording.webm";
/// First token every command template must carry.
pub const ENGINE_PROGRAM: &str = "ffmpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatId {
    Mp4,
    Avi,
    Mkv,
    Mov,
}

impl FormatId {
    pub const ALL: [FormatId; 4] = [FormatId::Mp4, FormatId::Avi, FormatId::Mkv, FormatId::Mov];

    pub fn extension(self) -> &'static str {
        match self {
            FormatId::Mp4 => "mp4",
            FormatId::Avi => "avi",
            FormatId::Mkv => "mkv",
            FormatId::Mov => "mov",
        }
    }

    pub fn output_name(self) -> String {
        format!("{}.{}", RECORDING_STEM, self.extension())
    }

    /// Re-mux the video track untouched and transcode audio to AAC.
    pub fn command_template(self) -> String {
        format!(
            "{} -i {} -c:v copy -c:a aac {}",
            ENGINE_PROGRAM,
            RAW_FILE_NAME,
            self.output_name()
        )
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FormatId {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(FormatId::Mp4),
            "avi" => Ok(FormatId::Avi),
            "mkv" => Ok(FormatId::Mkv),
            "mov" => Ok(FormatId::Mov),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// The concatenated capture chunks of one session. Cheap to clone, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct RawRecording {
    bytes: Arc<[u8]>,
}

impl RawRecording {
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let total = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in chunks {
            bytes.extend_from_slice(&chunk);
        }
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RawRecording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRecording").field("len", &self.bytes.len()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub format: FormatId,
    pub input: RawRecording,
    pub output_name: String,
}

impl TranscodeJob {
    pub fn new(format: FormatId, input: RawRecording) -> Self {
        Self { format, input, output_name: format.output_name() }
    }
}

/// A command-driven engine with a private working filesystem.
///
/// One instance is shared by all jobs; callers must not start a job while a
/// previous one still holds the engine loaded.
#[async_trait]
pub trait TranscodeEngine: Send {
    fn is_loaded(&self) -> bool;
    async fn load(&mut self) -> Result<(), EngineError>;
    async fn unload(&mut self) -> Result<(), EngineError>;
    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError>;
    /// Runs the engine with the template's arguments, program token excluded.
    async fn run(&mut self, args: &[String]) -> Result<(), EngineError>;
    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>, EngineError>;
}

/// Outcome of one pipeline pass, one entry per requested format.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    pub delivered: Vec<FormatId>,
    pub failed: Vec<(FormatId, String)>,
    pub skipped: Vec<FormatId>,
}

impl TranscodeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Splits a template into engine arguments. The first token must be the engine program.
pub fn parse_command(command: &str) -> Result<Vec<String>, TranscodeError> {
    let mut tokens = command.split_whitespace();
    match tokens.next() {
        Some(ENGINE_PROGRAM) => Ok(tokens.map(str::to_string).collect()),
        _ => Err(TranscodeError::MalformedCommand(command.to_string())),
    }
}

pub struct TranscodePipeline {
    engine: Box<dyn TranscodeEngine>,
    templates: HashMap<FormatId, String>,
}

impl TranscodePipeline {
    pub fn new(engine: Box<dyn TranscodeEngine>) -> Self {
        let templates = FormatId::ALL
            .iter()
            .map(|format| (*format, format.command_template()))
            .collect();
        Self { engine, templates }
    }

    /// Replaces the command template used for `format`.
    pub fn with_template(mut self, format: FormatId, command: impl Into<String>) -> Self {
        self.templates.insert(format, command.into());
        self
    }

    /// Transcodes `raw` into each requested format, one job at a time.
    pub async fn run(
        &mut self,
        raw: &RawRecording,
        formats: &[FormatId],
        sink: &mut dyn FileSink,
    ) -> TranscodeReport {
        let mut report = TranscodeReport::default();
        let mut seen = Vec::with_capacity(formats.len());

        for &format in formats {
            if seen.contains(&format) {
                continue;
            }
            seen.push(format);

            let job = TranscodeJob::new(format, raw.clone());
            match self.run_job(&job, sink).await {
                Ok(()) => {
                    info!("Delivered {}", job.output_name);
                    report.delivered.push(format);
                }
                Err(TranscodeError::MalformedCommand(command)) => {
                    error!(
                        "Command template for {} does not start with {:?}, skipping: {:?}",
                        format, ENGINE_PROGRAM, command
                    );
                    report.skipped.push(format);
                }
                Err(e) => {
                    warn!("Transcoding to {} failed: {}", format, e);
                    report.failed.push((format, e.to_string()));
                }
            }
        }

        report
    }

    async fn run_job(&mut self, job: &TranscodeJob, sink: &mut dyn FileSink) -> Result<(), TranscodeError> {
        let template = self
            .templates
            .get(&job.format)
            .cloned()
            .unwrap_or_else(|| job.format.command_template());
        let args = parse_command(&template)?;

        self.release_engine().await;
        debug!("Loading engine for {}", job.output_name);
        let output = match self.engine.load().await {
            Ok(()) => self.execute(job, &args).await,
            Err(e) => Err(e),
        };
        self.release_engine().await;

        let bytes = output?;
        sink.deliver(&job.output_name, &bytes).await?;
        Ok(())
    }

    async fn execute(&mut self, job: &TranscodeJob, args: &[String]) -> Result<Vec<u8>, EngineError> {
        self.engine.write_file(RAW_FILE_NAME, job.input.as_bytes()).await?;
        self.engine.run(args).await?;
        self.engine.read_file(&job.output_name).await
    }

    async fn release_engine(&mut self) {
        if !self.engine.is_loaded() {
            return;
        }
        if let Err(e) = self.engine.unload().await {
            error!("Failed to unload transcoding engine: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, MemorySink};

    fn raw() -> RawRecording {
        RawRecording::from_chunks(vec![b"webm-".to_vec(), b"bytes".to_vec()])
    }

    #[test]
    fn test_templates() {
        assert_eq!(
            FormatId::Mp4.command_template(),
            "ffmpeg -i screen_recording.webm -c:v copy -c:a aac screen_recording.mp4"
        );
        let args = parse_command(&FormatId::Mov.command_template()).unwrap();
        assert_eq!(args.first().map(String::as_str), Some("-i"));
        assert_eq!(args.last().map(String::as_str), Some("screen_recording.mov"));
        assert!(parse_command("ffprobe -i x").is_err());
        assert!(parse_command("").is_err());
    }

    #[test]
    fn test_format_ids() {
        assert_eq!("MKV".parse::<FormatId>(), Ok(FormatId::Mkv));
        assert_eq!("webm".parse::<FormatId>(), Err(UnknownFormat("webm".to_string())));
        assert_eq!(FormatId::Avi.output_name(), "screen_recording.avi");
    }

    #[test]
    fn test_raw_recording_concatenates_in_order() {
        let raw = raw();
        assert_eq!(raw.as_bytes(), b"webm-bytes");
        assert_eq!(raw.len(), 10);
        assert!(RawRecording::from_chunks(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_others() {
        let engine = FakeEngine::new().fail_run_for("avi");
        let log = engine.log();
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        let report = pipeline.run(&raw(), &[FormatId::Mp4, FormatId::Avi, FormatId::Mkv], &mut sink).await;

        assert_eq!(report.delivered, vec![FormatId::Mp4, FormatId::Mkv]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, FormatId::Avi);
        assert_eq!(sink.names(), vec!["screen_recording.mp4", "screen_recording.mkv"]);
        assert_eq!(sink.bytes("screen_recording.mp4"), Some(b"mp4:webm-bytes".to_vec()));
        assert!(!log.is_loaded());
    }

    #[tokio::test]
    async fn test_jobs_never_overlap_engine_sessions() {
        let engine = FakeEngine::new().fail_run_for("mkv");
        let log = engine.log();
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        pipeline.run(&raw(), &FormatId::ALL, &mut sink).await;

        let calls = log.calls();
        let mut loaded = false;
        let mut loads = 0;
        for call in &calls {
            match call.as_str() {
                "load" => {
                    assert!(!loaded, "load while a previous job still holds the engine: {:?}", calls);
                    loaded = true;
                    loads += 1;
                }
                "unload" => loaded = false,
                _ => assert!(loaded, "engine used while unloaded: {:?}", calls),
            }
        }
        assert_eq!(loads, 4);
        assert!(!loaded);
    }

    #[tokio::test]
    async fn test_dirty_engine_is_reset_before_first_job() {
        let engine = FakeEngine::new().preloaded();
        let log = engine.log();
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        pipeline.run(&raw(), &[FormatId::Mp4], &mut sink).await;

        let calls = log.calls();
        assert_eq!(calls[0], "unload");
        assert_eq!(calls[1], "load");
    }

    #[tokio::test]
    async fn test_load_failure_is_isolated() {
        let engine = FakeEngine::new().fail_load_times(1);
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        let report = pipeline.run(&raw(), &[FormatId::Mp4, FormatId::Mov], &mut sink).await;

        assert_eq!(report.delivered, vec![FormatId::Mov]);
        assert_eq!(report.failed[0].0, FormatId::Mp4);
    }

    #[tokio::test]
    async fn test_malformed_template_is_skipped_without_engine_use() {
        let engine = FakeEngine::new();
        let log = engine.log();
        let mut pipeline =
            TranscodePipeline::new(Box::new(engine)).with_template(FormatId::Avi, "avconv -i screen_recording.webm out.avi");
        let mut sink = MemorySink::default();

        let report = pipeline.run(&raw(), &[FormatId::Avi, FormatId::Mp4], &mut sink).await;

        assert_eq!(report.skipped, vec![FormatId::Avi]);
        assert_eq!(report.delivered, vec![FormatId::Mp4]);
        assert_eq!(log.calls().iter().filter(|c| *c == "load").count(), 1);
    }

    #[tokio::test]
    async fn test_no_formats_means_no_engine_work() {
        let engine = FakeEngine::new();
        let log = engine.log();
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        let report = pipeline.run(&raw(), &[], &mut sink).await;

        assert_eq!(report, TranscodeReport::default());
        assert!(log.calls().is_empty());
        assert!(sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_formats_run_once() {
        let engine = FakeEngine::new();
        let mut pipeline = TranscodePipeline::new(Box::new(engine));
        let mut sink = MemorySink::default();

        let report = pipeline.run(&raw(), &[FormatId::Mp4, FormatId::Mp4], &mut sink).await;

        assert_eq!(report.delivered, vec![FormatId::Mp4]);
        assert_eq!(sink.names().len(), 1);
    }
}
