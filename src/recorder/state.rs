//! Session state types

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl RecordingState {
    pub fn is_active(&self) -> bool {
        !matches!(self, RecordingState::Idle)
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Starting => write!(f, "starting"),
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Where a session writes its video and action log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTarget {
    pub directory: PathBuf,
    pub basename: String,
}

impl OutputTarget {
    pub fn new(directory: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            basename: basename.into(),
        }
    }

    /// Target named after the current local time plus a short random
    /// suffix, so back-to-back sessions never share files
    pub fn timestamped(directory: impl Into<PathBuf>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let basename = format!(
            "session_{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        );
        Self::new(directory, basename)
    }

    pub fn video_path(&self) -> PathBuf {
        self.directory.join(format!("{}.mp4", self.basename))
    }

    pub fn log_path(&self) -> PathBuf {
        self.directory.join(format!("{}.actions.json", self.basename))
    }
}

/// Identifies one started session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: Uuid,
    target: OutputTarget,
}

impl SessionHandle {
    pub(crate) fn new(target: OutputTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    pub fn video_path(&self) -> PathBuf {
        self.target.video_path()
    }

    pub fn log_path(&self) -> PathBuf {
        self.target.log_path()
    }

    pub fn directory(&self) -> &Path {
        &self.target.directory
    }
}
