use std::io;

/// Failures while acquiring or driving a capture source.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("No capture source available: {0}")]
    SourceUnavailable(String),

    #[error("Failed to spawn capture process: {0}")]
    Spawn(String),

    #[error("Recorder is {0}")]
    RecorderState(&'static str),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by a transcoding engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is not loaded")]
    NotLoaded,

    #[error("Engine load failed: {0}")]
    Load(String),

    #[error("Engine run failed: {0}")]
    Run(String),

    #[error("Invalid working file name: {0}")]
    InvalidFileName(String),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Why a single transcoding job produced no output.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Malformed command template: {0}")]
    MalformedCommand(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// A container name that is not one of the supported output formats.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown output format: {0}")]
pub struct UnknownFormat(pub String);

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}
