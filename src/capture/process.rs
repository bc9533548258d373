//! Capture process launching
//!
//! The screen capture process is an external program. A [`CaptureLauncher`]
//! only builds its command line; the capture monitor owns spawning, the
//! standard streams, and shutdown.

use crate::config::RecorderConfig;
use crate::recorder::channel::{RecordingError, RecordingResult};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

/// Builds the capture command for a session's video path
pub trait CaptureLauncher: Send + Sync {
    fn command(&self, video_path: &Path) -> RecordingResult<Command>;
}

impl<F> CaptureLauncher for F
where
    F: Fn(&Path) -> Command + Send + Sync,
{
    fn command(&self, video_path: &Path) -> RecordingResult<Command> {
        Ok(self(video_path))
    }
}

/// Screen capture through ffmpeg's platform grab devices
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg_path: String,
    framerate: u32,
    output_height: u32,
    /// avfoundation screen device index; discovered on first use when unset
    screen_device: Option<String>,
    discovered_device: OnceLock<String>,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg_path: impl Into<String>, framerate: u32, output_height: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            framerate,
            output_height,
            screen_device: None,
            discovered_device: OnceLock::new(),
        }
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            config.framerate,
            config.output_height,
        )
    }

    pub fn with_screen_device(mut self, device: impl Into<String>) -> Self {
        self.screen_device = Some(device.into());
        self
    }

    /// Check that the ffmpeg binary can be executed
    pub fn check_available(&self) -> RecordingResult<()> {
        match Command::new(&self.ffmpeg_path).arg("-version").output() {
            Ok(output) if output.status.success() => Ok(()),
            _ => Err(RecordingError::ConfigurationError(format!(
                "FFmpeg not found at '{}'. Please install FFmpeg.",
                self.ffmpeg_path
            ))),
        }
    }

    /// Arguments after the program name
    pub fn args(&self, video_path: &Path) -> RecordingResult<Vec<String>> {
        let framerate = self.framerate.to_string();
        let scale = format!("scale=-1:{}", self.output_height);
        let mut args: Vec<String> = vec!["-f".into(), grab_format().into()];
        args.extend(["-framerate".into(), framerate.clone()]);
        args.extend(self.input_args()?);
        args.extend(["-vf".into(), scale]);
        args.extend(["-vcodec".into(), video_codec().into()]);
        args.extend(["-r".into(), framerate]);
        args.extend(["-crf".into(), "30".into(), "-preset".into(), "ultrafast".into()]);
        args.push("-y".into());
        args.push(video_path.to_string_lossy().to_string());
        Ok(args)
    }

    #[cfg(target_os = "windows")]
    fn input_args(&self) -> RecordingResult<Vec<String>> {
        Ok(vec!["-i".into(), "desktop".into()])
    }

    #[cfg(target_os = "macos")]
    fn input_args(&self) -> RecordingResult<Vec<String>> {
        let device = self.resolve_device(|| self.discover_screen_device())?;
        Ok(vec![
            "-capture_cursor".into(),
            "1".into(),
            "-i".into(),
            device,
        ])
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn input_args(&self) -> RecordingResult<Vec<String>> {
        let display = self
            .screen_device
            .clone()
            .unwrap_or_else(|| ":0.0".to_string());
        Ok(vec![
            "-capture_cursor".into(),
            "1".into(),
            "-i".into(),
            display,
        ])
    }

    /// Configured device, else the one found by the first successful
    /// `discover` call of this launcher
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    fn resolve_device<F>(&self, discover: F) -> RecordingResult<String>
    where
        F: FnOnce() -> RecordingResult<String>,
    {
        if let Some(device) = &self.screen_device {
            return Ok(device.clone());
        }
        if let Some(device) = self.discovered_device.get() {
            return Ok(device.clone());
        }
        let device = discover()?;
        Ok(self.discovered_device.get_or_init(|| device).clone())
    }

    #[cfg(target_os = "macos")]
    fn discover_screen_device(&self) -> RecordingResult<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-f", "avfoundation", "-list_devices", "true", "-i", "\"\""])
            .output()?;
        // ffmpeg prints the device list on stderr and exits non-zero
        let listing = String::from_utf8_lossy(&output.stderr);
        let device = parse_screen_device(&listing).ok_or_else(|| {
            RecordingError::ConfigurationError("No screen capture device found".to_string())
        })?;
        tracing::info!("Screen capture device found: {}", device);
        Ok(device)
    }
}

impl CaptureLauncher for FfmpegLauncher {
    fn command(&self, video_path: &Path) -> RecordingResult<Command> {
        let mut command = Command::new(&self.ffmpeg_path);
        command.args(self.args(video_path)?);
        Ok(command)
    }
}

#[cfg(target_os = "windows")]
fn grab_format() -> &'static str {
    "gdigrab"
}

#[cfg(target_os = "macos")]
fn grab_format() -> &'static str {
    "avfoundation"
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn grab_format() -> &'static str {
    "x11grab"
}

#[cfg(target_os = "macos")]
fn video_codec() -> &'static str {
    "h264_videotoolbox"
}

#[cfg(not(target_os = "macos"))]
fn video_codec() -> &'static str {
    "libx264"
}

/// Pick the screen device index out of an avfoundation device listing, e.g.
/// `[AVFoundation indev @ 0x7f8] [3] Capture screen 0` gives `3`.
pub fn parse_screen_device(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.contains("Capture screen"))
        .find_map(|line| bracketed(line).nth(1).map(str::to_string))
}

fn bracketed(line: &str) -> impl Iterator<Item = &str> {
    line.split('[')
        .skip(1)
        .filter_map(|segment| segment.split_once(']').map(|(inner, _)| inner))
}
