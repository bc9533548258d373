//! Native input source backed by the rdev global hook
//!
//! The OS hook is process-global and `rdev::listen` never returns once
//! installed, so one hook thread is started on first attach and kept for the
//! life of the process. Attaching installs a handler in the global dispatch
//! slot; stopping clears it.

use crate::action::{MouseButton, Position};
use crate::capture::input::source::{HandlerSlot, InputListener, InputSource, SlotListener};
use crate::capture::input::types::{InputEvent, InputHandler, InputKind, Key};
use crate::recorder::channel::{RecordingError, RecordingResult};
use parking_lot::Mutex as ParkingMutex;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// How long attach waits for the hook to report an installation error
const HOOK_PROBE: Duration = Duration::from_millis(250);
const DISPLAY_REFRESH: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookState {
    NotStarted,
    Running,
}

struct NativeHook {
    slot: HandlerSlot,
    state: ParkingMutex<HookState>,
}

fn native_hook() -> &'static NativeHook {
    static HOOK: OnceLock<NativeHook> = OnceLock::new();
    HOOK.get_or_init(|| NativeHook {
        slot: HandlerSlot::new(),
        state: ParkingMutex::new(HookState::NotStarted),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RdevInputSource;

impl RdevInputSource {
    pub fn new() -> Self {
        Self
    }
}

impl InputSource for RdevInputSource {
    fn attach(&self, handler: Arc<dyn InputHandler>) -> RecordingResult<Box<dyn InputListener>> {
        let hook = native_hook();
        if !hook.slot.install(handler) {
            return Err(RecordingError::ListenerAttachFailed(
                "native input hook already has a handler".to_string(),
            ));
        }

        let mut state = hook.state.lock();
        if *state == HookState::NotStarted {
            if let Err(e) = start_hook_thread(hook.slot.clone()) {
                hook.slot.clear();
                return Err(e);
            }
            *state = HookState::Running;
        }
        tracing::info!("Native input listener attached");
        Ok(Box::new(SlotListener::new(hook.slot.clone())))
    }
}

fn start_hook_thread(slot: HandlerSlot) -> RecordingResult<()> {
    let (error_tx, error_rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("input-hook".to_string())
        .spawn(move || {
            let mut translator = EventTranslator::new();
            let result = rdev::listen(move |event: rdev::Event| {
                if let Some(event) = translator.translate(event) {
                    slot.dispatch(event);
                }
            });
            if let Err(error) = result {
                tracing::error!("Native input hook failed: {:?}", error);
                let _ = error_tx.send(format!("{:?}", error));
            }
        })
        .map_err(|e| RecordingError::ListenerAttachFailed(e.to_string()))?;

    match error_rx.recv_timeout(HOOK_PROBE) {
        Ok(reason) => Err(RecordingError::ListenerAttachFailed(reason)),
        // Still listening, or the thread is gone without reporting
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(()),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RecordingError::ListenerAttachFailed(
            "native input hook exited".to_string(),
        )),
    }
}

/// Per-hook-thread conversion state: rdev reports button and wheel events
/// without a position, and positions must be normalized by the screen size.
struct EventTranslator {
    last_pixel: (f64, f64),
    display: (f64, f64),
    display_checked: Option<Instant>,
}

impl EventTranslator {
    fn new() -> Self {
        Self {
            last_pixel: (0.0, 0.0),
            display: (0.0, 0.0),
            display_checked: None,
        }
    }

    fn position(&mut self, now: Instant) -> Position {
        let stale = self
            .display_checked
            .map(|checked| now.saturating_duration_since(checked) >= DISPLAY_REFRESH)
            .unwrap_or(true);
        if stale {
            match rdev::display_size() {
                Ok((w, h)) => self.display = (w as f64, h as f64),
                Err(e) => tracing::debug!("Display size unavailable: {:?}", e),
            }
            self.display_checked = Some(now);
        }
        Position::from_pixels(self.last_pixel.0, self.last_pixel.1, self.display.0, self.display.1)
    }

    fn translate(&mut self, event: rdev::Event) -> Option<InputEvent> {
        let now = Instant::now();
        let kind = match event.event_type {
            rdev::EventType::MouseMove { x, y } => {
                self.last_pixel = (x, y);
                InputKind::Move {
                    position: self.position(now),
                }
            }
            rdev::EventType::ButtonPress(button) => InputKind::Button {
                button: map_button(button),
                pressed: true,
                position: self.position(now),
            },
            rdev::EventType::ButtonRelease(button) => InputKind::Button {
                button: map_button(button),
                pressed: false,
                position: self.position(now),
            },
            rdev::EventType::Wheel { delta_y, .. } => InputKind::Wheel {
                position: self.position(now),
                delta_y,
            },
            rdev::EventType::KeyPress(key) => InputKind::KeyDown(map_key(key, event.name)),
            rdev::EventType::KeyRelease(_) => return None,
        };
        Some(InputEvent::new(kind, now))
    }
}

fn map_button(button: rdev::Button) -> MouseButton {
    match button {
        rdev::Button::Left => MouseButton::Left,
        rdev::Button::Right => MouseButton::Right,
        rdev::Button::Middle => MouseButton::Middle,
        rdev::Button::Unknown(code) => MouseButton::Other(code),
    }
}

/// A key that produced exactly one printable character is text; anything
/// else is reported by its key name.
fn map_key(key: rdev::Key, name: Option<String>) -> Key {
    if let Some(name) = name {
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if !c.is_control() {
                return Key::Char(c);
            }
        }
    }
    Key::Special(format!("{:?}", key))
}
