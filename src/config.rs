//! Recorder configuration
//!
//! A JSON file with every field optional. A missing file is created with the
//! defaults so users have something to edit; command-line overrides are
//! applied on top and the result is normalized before use.

use crate::aggregator::AggregatorConfig;
use crate::capture::monitor::CaptureConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "action-recorder.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub framerate: u32,
    pub output_height: u32,
    pub ffmpeg_path: String,
    pub start_marker: String,
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub monitor_poll_ms: u64,
    pub keyboard_idle_ms: u64,
    pub scroll_flush_ms: u64,
    pub drag_threshold: f64,
    pub scroll_anchor_threshold: f64,
    pub record_mouse_moves: bool,
    pub mouse_move_interval_ms: u64,
    pub max_duration_secs: Option<u64>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            output_height: 720,
            ffmpeg_path: "ffmpeg".to_string(),
            start_marker: "frame".to_string(),
            start_timeout_ms: 10_000,
            stop_timeout_ms: 5_000,
            monitor_poll_ms: 1_000,
            keyboard_idle_ms: 5_000,
            scroll_flush_ms: 500,
            drag_threshold: 0.01,
            scroll_anchor_threshold: 0.01,
            record_mouse_moves: true,
            mouse_move_interval_ms: 0,
            max_duration_secs: None,
        }
    }
}

impl RecorderConfig {
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            keyboard_idle: Duration::from_millis(self.keyboard_idle_ms),
            scroll_flush_delay: Duration::from_millis(self.scroll_flush_ms),
            drag_threshold: self.drag_threshold,
            scroll_anchor_threshold: self.scroll_anchor_threshold,
            record_mouse_moves: self.record_mouse_moves,
            mouse_move_interval: Duration::from_millis(self.mouse_move_interval_ms),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            start_marker: self.start_marker.clone(),
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            poll_interval: Duration::from_millis(self.monitor_poll_ms),
        }
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub framerate: Option<u32>,
    pub output_height: Option<u32>,
    pub max_duration_secs: Option<u64>,
}

pub fn load_config(base_dir: &Path, overrides: &CliOverrides) -> Result<RecorderConfig> {
    let config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE));
    let mut config = load_or_create_config(&config_path)?;
    apply_overrides(&mut config, overrides);
    Ok(normalize_config(config))
}

pub fn load_or_create_config(path: &Path) -> Result<RecorderConfig> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let user_value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        return merge_with_defaults(&user_value);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
    }
    let config = RecorderConfig::default();
    let payload = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    fs::write(path, payload).context("Failed to write config file")?;
    tracing::info!("Wrote default config to {:?}", path);
    Ok(config)
}

fn apply_overrides(config: &mut RecorderConfig, overrides: &CliOverrides) {
    if let Some(framerate) = overrides.framerate {
        config.framerate = framerate;
    }
    if let Some(output_height) = overrides.output_height {
        config.output_height = output_height;
    }
    if let Some(max_duration_secs) = overrides.max_duration_secs {
        config.max_duration_secs = Some(max_duration_secs);
    }
}

pub fn normalize_config(mut config: RecorderConfig) -> RecorderConfig {
    config.framerate = config.framerate.clamp(1, 240);
    // libx264 needs an even height
    config.output_height = (config.output_height.max(2) / 2) * 2;
    config.start_timeout_ms = config.start_timeout_ms.max(100);
    config.stop_timeout_ms = config.stop_timeout_ms.max(100);
    config.monitor_poll_ms = config.monitor_poll_ms.clamp(10, 60_000);
    config.keyboard_idle_ms = config.keyboard_idle_ms.max(1);
    config.scroll_flush_ms = config.scroll_flush_ms.max(1);
    config.drag_threshold = sanitize_threshold(config.drag_threshold, 0.01);
    config.scroll_anchor_threshold = sanitize_threshold(config.scroll_anchor_threshold, 0.01);
    if config.ffmpeg_path.trim().is_empty() {
        config.ffmpeg_path = "ffmpeg".to_string();
    }
    if config.start_marker.is_empty() {
        config.start_marker = "frame".to_string();
    }
    if config.max_duration_secs == Some(0) {
        config.max_duration_secs = None;
    }
    config
}

fn sanitize_threshold(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn merge_with_defaults(user_value: &Value) -> Result<RecorderConfig> {
    let mut default_value = serde_json::to_value(RecorderConfig::default())
        .context("Failed to serialize default config")?;
    merge_config_value(&mut default_value, user_value);
    serde_json::from_value(default_value).context("Failed to merge config defaults")
}

fn merge_config_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_config_value(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_value, source_value) => {
            *target_value = source_value.clone();
        }
    }
}
