//! Finalized user actions and the append-only action log

use serde::{Deserialize, Serialize};

/// Screen position normalized by the screen resolution at the moment of
/// observation, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Normalize pixel coordinates by a screen size. A zero-sized screen maps
    /// to the origin.
    pub fn from_pixels(x: f64, y: f64, width: f64, height: f64) -> Self {
        let nx = if width > 0.0 { x / width } else { 0.0 };
        let ny = if height > 0.0 { y / height } else { 0.0 };
        Self {
            x: nx.clamp(0.0, 1.0),
            y: ny.clamp(0.0, 1.0),
        }
    }

    /// True if either axis differs from `other` by more than `threshold`
    pub fn moved_beyond(&self, other: &Position, threshold: f64) -> bool {
        (self.x - other.x).abs() > threshold || (self.y - other.y).abs() > threshold
    }
}

/// Mouse button. Older logs spell these `Button.left` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[serde(alias = "Button.left")]
    Left,
    #[serde(alias = "Button.right")]
    Right,
    #[serde(alias = "Button.middle")]
    Middle,
    Other(u8),
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Right => write!(f, "right"),
            MouseButton::Middle => write!(f, "middle"),
            MouseButton::Other(n) => write!(f, "button{}", n),
        }
    }
}

/// A finalized action. Times are seconds relative to the session epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        time: f64,
        button: MouseButton,
        position: Position,
    },
    Drag {
        start_time: f64,
        end_time: f64,
        start: Position,
        end: Position,
    },
    Scroll {
        start_time: f64,
        end_time: f64,
        #[serde(alias = "amount")]
        total_amount: i64,
        position: Position,
    },
    #[serde(alias = "keypress")]
    KeyPress {
        start_time: f64,
        end_time: f64,
        #[serde(alias = "keys")]
        text: String,
    },
    SpecialKey {
        time: f64,
        #[serde(alias = "key")]
        key_identifier: String,
    },
    MouseMove {
        time: f64,
        position: Position,
    },
}

impl Action {
    /// Time the action began
    pub fn start_time(&self) -> f64 {
        match self {
            Action::Click { time, .. }
            | Action::SpecialKey { time, .. }
            | Action::MouseMove { time, .. } => *time,
            Action::Drag { start_time, .. }
            | Action::Scroll { start_time, .. }
            | Action::KeyPress { start_time, .. } => *start_time,
        }
    }

    /// Time the action ended; equal to the start for instantaneous actions
    pub fn end_time(&self) -> f64 {
        match self {
            Action::Click { time, .. }
            | Action::SpecialKey { time, .. }
            | Action::MouseMove { time, .. } => *time,
            Action::Drag { end_time, .. }
            | Action::Scroll { end_time, .. }
            | Action::KeyPress { end_time, .. } => *end_time,
        }
    }

    /// Serialized tag of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Drag { .. } => "drag",
            Action::Scroll { .. } => "scroll",
            Action::KeyPress { .. } => "key_press",
            Action::SpecialKey { .. } => "special_key",
            Action::MouseMove { .. } => "mouse_move",
        }
    }
}

/// Ordered, append-only sequence of finalized actions.
///
/// Entries are never handed out mutably; readers get a copy or take the whole
/// log once the session is quiesced.
#[derive(Debug, Default, Clone)]
pub struct ActionLog {
    actions: Vec<Action>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        debug_assert!(action.end_time() >= action.start_time());
        tracing::trace!("Action finalized: {:?}", action);
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn snapshot(&self) -> Vec<Action> {
        self.actions.clone()
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}
