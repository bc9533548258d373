//! Input tracking (keyboard, mouse)
//!
//! Raw events come from an [`InputSource`]: the OS hook behind the
//! `native-input` feature, or [`ManualInputSource`] for programmatic input.
//! The [`InputTrackingChannel`] connects a source to a session's aggregator.

pub mod channel;
pub mod manual;
#[cfg(feature = "native-input")]
pub mod rdev_source;
pub mod source;
pub mod types;

pub use channel::InputTrackingChannel;
pub use manual::{InputInjector, ManualInputSource};
#[cfg(feature = "native-input")]
pub use rdev_source::RdevInputSource;
pub use source::{HandlerSlot, InputListener, InputSource};
pub use types::{InputEvent, InputHandler, InputKind, Key};
