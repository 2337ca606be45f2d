//! User settings: the persisted flat record and the store that notifies on change.
//!
//! The on-disk shape is the same flat record the options surface edits:
//! `resolution`, `audio`, `formats`, `startShortcut`, `stopShortcut`.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::SettingsError;
use crate::transcode::FormatId;

pub const DEFAULT_START_SHORTCUT: &str = "Ctrl+Shift+S";
pub const DEFAULT_STOP_SHORTCUT: &str = "Ctrl+Shift+E";

/// Capture resolution tier, persisted under its display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ResolutionTier {
    #[serde(rename = "480p")]
    Low,
    #[serde(rename = "720p")]
    Medium,
    #[default]
    #[serde(rename = "1080p")]
    High,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 3] = [ResolutionTier::High, ResolutionTier::Medium, ResolutionTier::Low];

    /// Requested capture width for this tier.
    pub fn capture_width(self) -> u32 {
        match self {
            ResolutionTier::High => 1920,
            ResolutionTier::Medium => 1280,
            ResolutionTier::Low => 640,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolutionTier::High => "1080p",
            ResolutionTier::Medium => "720p",
            ResolutionTier::Low => "480p",
        }
    }

    /// Anything that is not a known high or medium label falls to the lowest tier.
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "1080p" | "high" => ResolutionTier::High,
            "720p" | "medium" => ResolutionTier::Medium,
            "480p" | "low" => ResolutionTier::Low,
            other => {
                warn!("Unknown resolution {:?}, using 480p", other);
                ResolutionTier::Low
            }
        }
    }
}

impl<'de> Deserialize<'de> for ResolutionTier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(ResolutionTier::from_label(&label))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "resolution", default)]
    pub resolution_tier: ResolutionTier,
    #[serde(rename = "audio", default)]
    pub record_audio: bool,
    /// May be empty, in which case only the raw recording is delivered.
    #[serde(rename = "formats", default = "default_formats", deserialize_with = "deserialize_formats")]
    pub output_formats: Vec<FormatId>,
    #[serde(default = "default_start_shortcut")]
    pub start_shortcut: String,
    #[serde(default = "default_stop_shortcut")]
    pub stop_shortcut: String,
}

fn default_formats() -> Vec<FormatId> {
    vec![FormatId::Mp4]
}

fn default_start_shortcut() -> String {
    DEFAULT_START_SHORTCUT.to_string()
}

fn default_stop_shortcut() -> String {
    DEFAULT_STOP_SHORTCUT.to_string()
}

// Unknown identifiers are dropped and duplicates collapsed so the list behaves as a set.
fn deserialize_formats<'de, D>(deserializer: D) -> Result<Vec<FormatId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    let mut formats = Vec::with_capacity(raw.len());
    for id in raw {
        match id.parse::<FormatId>() {
            Ok(format) if !formats.contains(&format) => formats.push(format),
            Ok(_) => {}
            Err(e) => warn!("Ignoring {}", e),
        }
    }
    Ok(formats)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution_tier: ResolutionTier::default(),
            record_audio: false,
            output_formats: default_formats(),
            start_shortcut: default_start_shortcut(),
            stop_shortcut: default_stop_shortcut(),
        }
    }
}

/// Persisted key/value settings with change notification.
///
/// `subscribe` hands out a revision counter that ticks after every save.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, SettingsError>;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Settings stored as pretty JSON in a single file.
pub struct JsonSettingsStore {
    path: PathBuf,
    revision: watch::Sender<u64>,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (revision, _) = watch::channel(0);
        Self { path: path.into(), revision }
    }

    /// `<config dir>/screenrec/settings.json`, or the working directory when no config dir exists.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("screenrec"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            info!("No settings found at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, contents)?;
        info!("Saved settings to {:?}", self.path);
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Volatile store, used when persistence is disabled.
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    revision: watch::Sender<u64>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        let (revision, _) = watch::channel(0);
        Self { settings: Mutex::new(settings), revision }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        *self.settings.lock() = settings.clone();
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
