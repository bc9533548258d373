//! Programmatic input source
//!
//! Events are pushed through an [`InputInjector`] instead of an OS hook. Used
//! for replaying recorded input and for driving sessions in tests.

use crate::action::{MouseButton, Position};
use crate::capture::input::source::{HandlerSlot, InputListener, InputSource, SlotListener};
use crate::capture::input::types::{InputEvent, InputHandler, InputKind, Key};
use crate::recorder::channel::{RecordingError, RecordingResult};
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
pub struct ManualInputSource {
    slot: HandlerSlot,
    attach_failure: ParkingMutex<Option<String>>,
}

impl ManualInputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `attach` fail with `reason`
    pub fn fail_attach(&self, reason: impl Into<String>) {
        *self.attach_failure.lock() = Some(reason.into());
    }

    pub fn allow_attach(&self) {
        *self.attach_failure.lock() = None;
    }

    pub fn injector(&self) -> InputInjector {
        InputInjector {
            slot: self.slot.clone(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.is_attached()
    }
}

impl InputSource for ManualInputSource {
    fn attach(&self, handler: Arc<dyn InputHandler>) -> RecordingResult<Box<dyn InputListener>> {
        if let Some(reason) = self.attach_failure.lock().clone() {
            return Err(RecordingError::ListenerAttachFailed(reason));
        }
        if !self.slot.install(handler) {
            return Err(RecordingError::ListenerAttachFailed(
                "a handler is already attached".to_string(),
            ));
        }
        tracing::debug!("Manual input source attached");
        Ok(Box::new(SlotListener::new(self.slot.clone())))
    }
}

/// Handle for pushing events into a [`ManualInputSource`]. Every method
/// returns whether a handler received the event.
#[derive(Clone)]
pub struct InputInjector {
    slot: HandlerSlot,
}

impl InputInjector {
    pub fn send(&self, event: InputEvent) -> bool {
        self.slot.dispatch(event)
    }

    pub fn send_now(&self, kind: InputKind) -> bool {
        self.send(InputEvent::now(kind))
    }

    pub fn key(&self, key: Key) -> bool {
        self.send_now(InputKind::KeyDown(key))
    }

    /// Type each character of `text` as its own key event
    pub fn type_text(&self, text: &str) -> bool {
        text.chars().all(|c| self.key(Key::Char(c)))
    }

    pub fn special_key(&self, identifier: &str) -> bool {
        self.key(Key::Special(identifier.to_string()))
    }

    pub fn button(&self, button: MouseButton, position: Position, pressed: bool) -> bool {
        self.send_now(InputKind::Button {
            button,
            pressed,
            position,
        })
    }

    pub fn click(&self, button: MouseButton, position: Position) -> bool {
        self.button(button, position, true) && self.button(button, position, false)
    }

    pub fn drag(&self, button: MouseButton, from: Position, to: Position) -> bool {
        self.button(button, from, true)
            && self.move_to(to)
            && self.button(button, to, false)
    }

    pub fn scroll(&self, position: Position, delta_y: i64) -> bool {
        self.send_now(InputKind::Wheel { position, delta_y })
    }

    pub fn move_to(&self, position: Position) -> bool {
        self.send_now(InputKind::Move { position })
    }

    /// Send with an explicit observation instant (replay)
    pub fn send_at(&self, kind: InputKind, at: Instant) -> bool {
        self.send(InputEvent::new(kind, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<InputKind>>);

    impl InputHandler for Recording {
        fn handle(&self, event: InputEvent) {
            self.0.lock().push(event.kind);
        }
    }

    #[test]
    fn test_injected_events_reach_handler_until_stop() {
        let source = ManualInputSource::new();
        let injector = source.injector();
        let handler = Arc::new(Recording::default());

        assert!(!injector.type_text("x"));
        let mut listener = source.attach(handler.clone()).unwrap();
        assert!(source.is_attached());
        assert!(injector.type_text("hi"));
        assert!(injector.click(MouseButton::Left, Position::new(0.5, 0.5)));

        listener.stop();
        assert!(!injector.special_key("Enter"));
        assert_eq!(handler.0.lock().len(), 4);
    }

    #[test]
    fn test_attach_failure() {
        let source = ManualInputSource::new();
        source.fail_attach("no permission");
        match source.attach(Arc::new(Recording::default())) {
            Err(RecordingError::ListenerAttachFailed(reason)) => assert_eq!(reason, "no permission"),
            _ => panic!("attach should fail"),
        }

        source.allow_attach();
        assert!(source.attach(Arc::new(Recording::default())).is_ok());
    }

    #[test]
    fn test_second_attach_rejected() {
        let source = ManualInputSource::new();
        let _first = source.attach(Arc::new(Recording::default())).unwrap();
        assert!(source.attach(Arc::new(Recording::default())).is_err());
    }
}
