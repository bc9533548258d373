//! Click vs. drag classification from press/release pairs

use crate::action::{Action, MouseButton, Position};

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragCandidate {
    button: MouseButton,
    position: Position,
    start_time: f64,
}

#[derive(Debug)]
pub struct GestureClassifier {
    candidate: Option<DragCandidate>,
    drag_threshold: f64,
}

impl GestureClassifier {
    pub fn new(drag_threshold: f64) -> Self {
        Self {
            candidate: None,
            drag_threshold,
        }
    }

    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }

    /// Record a press. A second press before release replaces the candidate.
    pub fn press(&mut self, button: MouseButton, position: Position, time: f64) {
        self.candidate = Some(DragCandidate {
            button,
            position,
            start_time: time,
        });
    }

    /// Classify a release against the pending press. The candidate is
    /// cleared whether or not an action is produced.
    pub fn release(&mut self, button: MouseButton, position: Position, time: f64) -> Option<Action> {
        let candidate = self.candidate.take()?;
        if candidate.position.moved_beyond(&position, self.drag_threshold) {
            Some(Action::Drag {
                start_time: candidate.start_time,
                end_time: time.max(candidate.start_time),
                start: candidate.position,
                end: position,
            })
        } else {
            Some(Action::Click {
                time,
                button,
                position,
            })
        }
    }

    /// Drop an unreleased press (session end)
    pub fn clear(&mut self) {
        self.candidate = None;
    }
}
