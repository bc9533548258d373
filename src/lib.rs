//! Action Recorder - user actions as a timestamped log, aligned with a screen recording.
//!
//! Raw keyboard and mouse events are coalesced into actions (clicks, drags,
//! scroll bursts, typed text, special keys, mouse moves). Every timestamp is
//! relative to the first frame reported by the external screen capture
//! process, so the log lines up with the video it was recorded alongside.

pub mod action;
pub mod aggregator;
pub mod capture;
pub mod clock;
pub mod config;
pub mod persist;
pub mod recorder;

pub use action::{Action, ActionLog, MouseButton, Position};
pub use aggregator::{AggregatorConfig, EventAggregator};
pub use clock::{Clock, Epoch};
pub use config::RecorderConfig;
pub use persist::{load_action_log, write_action_log};
pub use recorder::{
    OutputTarget, Recorder, RecordingError, RecordingResult, RecordingState, SessionHandle,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "action_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
