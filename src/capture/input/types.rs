use crate::action::{MouseButton, Position};
use std::time::Instant;

/// A key reported by an input source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// A key that produced printable text
    Char(char),
    /// Any other key (modifiers, navigation, function keys, ...)
    Special(String),
}

/// Payload of a raw input event. Positions are already normalized by the
/// source using the screen size at the moment of observation.
#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    KeyDown(Key),
    Button {
        button: MouseButton,
        pressed: bool,
        position: Position,
    },
    Wheel {
        position: Position,
        delta_y: i64,
    },
    Move {
        position: Position,
    },
}

/// A raw input event with the wall-clock instant it was observed
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub at: Instant,
}

impl InputEvent {
    pub fn new(kind: InputKind, at: Instant) -> Self {
        Self { kind, at }
    }

    /// Event observed now
    pub fn now(kind: InputKind) -> Self {
        Self::new(kind, Instant::now())
    }
}

/// Receiver of raw input events. Implemented by the event aggregator.
pub trait InputHandler: Send + Sync {
    fn handle(&self, event: InputEvent);
}
