//! Per-modality burst accumulation
//!
//! Keyboard and scroll input arrive as many small events; each buffer here
//! collects one burst and turns it into a single [`Action`] when flushed.
//! A flushed burst ends at the relative time it was finalized, not at its
//! last event. Flushing an empty buffer returns `None` and never fails.

use crate::action::{Action, Position};
use std::time::{Duration, Instant};

/// Pending run of character keys
#[derive(Debug, Default)]
pub struct KeyboardBuffer {
    text: String,
    start_time: f64,
    last_key_at: Option<Instant>,
}

impl KeyboardBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append a character typed at relative `time` / wall-clock `at`
    pub fn push(&mut self, c: char, time: f64, at: Instant) {
        if self.text.is_empty() {
            self.start_time = time;
        }
        self.text.push(c);
        self.last_key_at = Some(at);
    }

    /// Finalize the pending text as a burst ending at `end_time`
    pub fn flush(&mut self, end_time: f64) -> Option<Action> {
        if self.text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.text);
        tracing::debug!("Keyboard burst flushed ({} chars)", text.chars().count());
        Some(Action::KeyPress {
            start_time: self.start_time,
            end_time: end_time.max(self.start_time),
            text,
        })
    }

    /// Flush if more than `idle` has passed since the last keystroke
    pub fn flush_if_idle(
        &mut self,
        now: Instant,
        idle: Duration,
        end_time: f64,
    ) -> Option<Action> {
        match self.last_key_at {
            Some(last) if !self.text.is_empty() && now.saturating_duration_since(last) > idle => {
                self.flush(end_time)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingScroll {
    total: i64,
    anchor: Position,
    direction: i64,
    start_time: f64,
    last_event_at: Instant,
}

/// Pending scroll burst anchored at a position and direction
#[derive(Debug, Default)]
pub struct ScrollBurst {
    pending: Option<PendingScroll>,
}

impl ScrollBurst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Add a wheel delta.
    ///
    /// If the position moved beyond `anchor_threshold` or the direction
    /// flipped, the previous burst is finalized at `time` and returned, and a
    /// new burst is opened at this event.
    pub fn add(
        &mut self,
        position: Position,
        delta_y: i64,
        time: f64,
        at: Instant,
        anchor_threshold: f64,
    ) -> Option<Action> {
        let direction = delta_y.signum();
        let invalidated = match &self.pending {
            Some(p) => {
                p.anchor.moved_beyond(&position, anchor_threshold) || p.direction != direction
            }
            None => false,
        };
        let flushed = if invalidated { self.flush(time) } else { None };

        let burst = self.pending.get_or_insert_with(|| PendingScroll {
            total: 0,
            anchor: position,
            direction,
            start_time: time,
            last_event_at: at,
        });
        burst.total += delta_y;
        burst.last_event_at = at;

        flushed
    }

    /// Finalize the pending burst. A burst that sums to zero is dropped.
    pub fn flush(&mut self, end_time: f64) -> Option<Action> {
        let burst = self.pending.take()?;
        if burst.total == 0 {
            tracing::debug!("Scroll burst cancelled out; dropped");
            return None;
        }
        tracing::debug!("Scroll burst flushed (amount={})", burst.total);
        Some(Action::Scroll {
            start_time: burst.start_time,
            end_time: end_time.max(burst.start_time),
            total_amount: burst.total,
            position: burst.anchor,
        })
    }

    /// Flush if at least `delay` has passed since the last scroll event
    pub fn flush_if_stale(
        &mut self,
        now: Instant,
        delay: Duration,
        end_time: f64,
    ) -> Option<Action> {
        let stale = self
            .pending
            .as_ref()
            .map(|p| now.saturating_duration_since(p.last_event_at) >= delay)
            .unwrap_or(false);
        if stale {
            self.flush(end_time)
        } else {
            None
        }
    }
}
