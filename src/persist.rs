//! Action log persistence
//!
//! The log is written once per session: serialized to a temporary file in the
//! destination directory, then renamed over the final path, so a reader never
//! observes a partially written log.

use crate::action::Action;
use crate::recorder::channel::{RecordingError, RecordingResult};
use std::io::Write;
use std::path::Path;

fn write_failed(path: &Path, source: std::io::Error) -> RecordingError {
    RecordingError::PersistenceWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomically write `actions` as a pretty-printed JSON array to `path`
pub fn write_action_log(path: &Path, actions: &[Action]) -> RecordingResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| write_failed(path, e))?;

    let data = serde_json::to_vec_pretty(actions)
        .map_err(|e| write_failed(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_failed(path, e))?;
    tmp.write_all(&data).map_err(|e| write_failed(path, e))?;
    tmp.as_file().sync_all().map_err(|e| write_failed(path, e))?;
    tmp.persist(path).map_err(|e| write_failed(path, e.error))?;

    tracing::info!("Action log written: {:?} ({} actions)", path, actions.len());
    Ok(())
}

/// Read a persisted action log
pub fn load_action_log(path: &Path) -> RecordingResult<Vec<Action>> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| {
        RecordingError::ConfigurationError(format!("Invalid action log {:?}: {}", path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{MouseButton, Position};

    fn sample_actions() -> Vec<Action> {
        vec![
            Action::KeyPress {
                start_time: 0.5,
                end_time: 1.25,
                text: "hello".to_string(),
            },
            Action::Click {
                time: 2.0,
                button: MouseButton::Left,
                position: Position::new(0.25, 0.75),
            },
            Action::Scroll {
                start_time: 3.0,
                end_time: 3.2,
                total_amount: -4,
                position: Position::new(0.5, 0.5),
            },
        ]
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.actions.json");

        write_action_log(&path, &sample_actions()).unwrap();
        let loaded = load_action_log(&path).unwrap();
        assert_eq!(loaded, sample_actions());

        // No temporary files left next to the log
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");

        write_action_log(&path, &sample_actions()).unwrap();
        write_action_log(&path, &[]).unwrap();
        assert!(load_action_log(&path).unwrap().is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("log.json");
        write_action_log(&path, &sample_actions()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_destination_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("log.json");

        match write_action_log(&path, &sample_actions()) {
            Err(RecordingError::PersistenceWriteFailed { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_older_recorder_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_2024-05-01_10-00-00.json");
        std::fs::write(
            &path,
            r#"[
    {
        "start_time": 0.1,
        "end_time": 0.4,
        "type": "keypress",
        "keys": "abc"
    },
    {
        "time": 0.9,
        "type": "click",
        "button": "Button.left",
        "position": {"x": 0.5, "y": 0.5}
    },
    {
        "start_time": 1.0,
        "end_time": 1.6,
        "type": "scroll",
        "amount": 2,
        "position": {"x": 0.5, "y": 0.5}
    },
    {
        "time": 2.0,
        "type": "special_key",
        "key": "Key.enter"
    }
]"#,
        )
        .unwrap();

        let loaded = load_action_log(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(matches!(&loaded[0], Action::KeyPress { text, .. } if text == "abc"));
        assert!(matches!(loaded[1], Action::Click { button: MouseButton::Left, .. }));
        assert!(matches!(loaded[2], Action::Scroll { total_amount: 2, .. }));
        assert!(matches!(&loaded[3], Action::SpecialKey { key_identifier, .. } if key_identifier == "Key.enter"));
    }
}
