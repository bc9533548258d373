//! Capture collaborators
//!
//! The external screen capture process and the input tracking sources.

pub mod input;
pub mod monitor;
pub mod process;

pub use input::InputTrackingChannel;
pub use monitor::{CaptureChannel, CaptureConfig};
pub use process::{CaptureLauncher, FfmpegLauncher};
