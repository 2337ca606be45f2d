use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Screen grabbing device ffmpeg reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    /// X11 display, e.g. `:0.0`.
    X11Grab { display: String },
    /// avfoundation screen device index, e.g. `1` for "Capture screen 0".
    AvFoundation { screen: String },
    GdiGrab,
}

impl CaptureInput {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            CaptureInput::AvFoundation { screen: "1".to_string() }
        } else if cfg!(target_os = "windows") {
            CaptureInput::GdiGrab
        } else {
            let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
            CaptureInput::X11Grab { display }
        }
    }

    /// Audio device used when audio is requested and none is configured.
    pub fn default_audio_device(&self) -> Option<&'static str> {
        match self {
            CaptureInput::X11Grab { .. } => Some("default"),
            CaptureInput::AvFoundation { .. } => Some("0"),
            // dshow device names are machine specific
            CaptureInput::GdiGrab => None,
        }
    }
}

impl fmt::Display for CaptureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureInput::X11Grab { display } => write!(f, "x11grab {}", display),
            CaptureInput::AvFoundation { screen } => write!(f, "avfoundation screen {}", screen),
            CaptureInput::GdiGrab => f.write_str("gdigrab desktop"),
        }
    }
}

/// Builder for the capture commands.
///
/// The hold command opens the grab devices and discards every frame; it keeps
/// the capture permission alive while nothing is being recorded. The encode
/// command scales to the requested width and streams VP9/Opus webm on stdout.
pub struct FfmpegCommandBuilder {
    ffmpeg_path: PathBuf,
    input: CaptureInput,
    width: u32,
    fps: u32,
    bitrate_kbps: u32,
    audio_device: Option<String>,
}

impl FfmpegCommandBuilder {
    pub fn new(ffmpeg_path: PathBuf, input: CaptureInput, width: u32) -> Self {
        Self {
            ffmpeg_path,
            input,
            width,
            fps: 30,
            bitrate_kbps: 4000,
            audio_device: None,
        }
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn bitrate_kbps(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    /// Records audio from `device` when set.
    pub fn audio_device(mut self, device: Option<String>) -> Self {
        self.audio_device = device;
        self
    }

    fn input_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let fps = self.fps.to_string();

        match &self.input {
            CaptureInput::X11Grab { display } => {
                args.extend(["-f", "x11grab", "-framerate", fps.as_str(), "-i", display.as_str()].map(String::from));
                if let Some(device) = &self.audio_device {
                    args.extend(["-f", "pulse", "-i", device.as_str()].map(String::from));
                }
            }
            CaptureInput::AvFoundation { screen } => {
                // avfoundation takes "<video>:<audio>" in a single input
                let device = format!("{}:{}", screen, self.audio_device.as_deref().unwrap_or("none"));
                args.extend(
                    ["-f", "avfoundation", "-capture_cursor", "1", "-framerate", fps.as_str(), "-i", device.as_str()]
                        .map(String::from),
                );
            }
            CaptureInput::GdiGrab => {
                args.extend(["-f", "gdigrab", "-framerate", fps.as_str(), "-i", "desktop"].map(String::from));
                if let Some(device) = &self.audio_device {
                    let device = format!("audio={}", device);
                    args.extend(["-f", "dshow", "-i", device.as_str()].map(String::from));
                }
            }
        }
        args
    }

    pub fn hold_args(&self) -> Vec<String> {
        let mut args = self.input_args();
        args.extend(["-f", "null", "-"].map(String::from));
        args
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = self.input_args();
        args.push("-vf".to_string());
        args.push(format!("scale={}:-2", self.width));
        args.extend(["-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8"].map(String::from));
        args.push("-b:v".to_string());
        args.push(format!("{}k", self.bitrate_kbps));

        if self.audio_device.is_some() {
            args.extend(["-c:a", "libopus"].map(String::from));
        } else {
            args.push("-an".to_string());
        }

        args.extend(["-f", "webm", "-"].map(String::from));
        args
    }

    pub fn build(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn build_hold(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.hold_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
