//! Input source abstraction
//!
//! An [`InputSource`] delivers raw events to one attached [`InputHandler`].
//! Attaching returns an [`InputListener`]; once its `stop` returns, no
//! callback into the handler is running or will run.

use crate::capture::input::types::{InputEvent, InputHandler};
use crate::recorder::channel::RecordingResult;
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;

pub trait InputSource: Send + Sync {
    fn attach(&self, handler: Arc<dyn InputHandler>) -> RecordingResult<Box<dyn InputListener>>;
}

pub trait InputListener: Send {
    /// Detach from the source. Blocks until an in-flight callback returns.
    fn stop(&mut self);
}

/// Slot holding the currently attached handler.
///
/// Dispatch runs with the slot locked, so clearing the slot waits for any
/// callback in progress.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    inner: Arc<ParkingMutex<Option<Arc<dyn InputHandler>>>>,
}

impl HandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`; fails if another handler is attached
    pub fn install(&self, handler: Arc<dyn InputHandler>) -> bool {
        let mut slot = self.inner.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(handler);
        true
    }

    /// Deliver an event; returns false when nothing is attached
    pub fn dispatch(&self, event: InputEvent) -> bool {
        let slot = self.inner.lock();
        match slot.as_ref() {
            Some(handler) => {
                handler.handle(event);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) -> bool {
        self.inner.lock().take().is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// Listener that detaches by clearing a [`HandlerSlot`]
pub struct SlotListener {
    slot: HandlerSlot,
    attached: bool,
}

impl SlotListener {
    pub fn new(slot: HandlerSlot) -> Self {
        Self {
            slot,
            attached: true,
        }
    }
}

impl InputListener for SlotListener {
    fn stop(&mut self) {
        if self.attached {
            self.attached = false;
            self.slot.clear();
        }
    }
}

impl Drop for SlotListener {
    fn drop(&mut self) {
        self.stop();
    }
}
