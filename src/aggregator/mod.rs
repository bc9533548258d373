//! Event aggregation
//!
//! The [`EventAggregator`] is the single owner of a session's action log. Raw
//! input events from any listener thread are serialized through one lock,
//! routed to the keyboard/scroll coalescers or the gesture classifier, and the
//! resulting actions are appended in the order they were finalized.

pub mod coalescer;
pub mod gesture;
pub mod timer;

pub use coalescer::{KeyboardBuffer, ScrollBurst};
pub use gesture::GestureClassifier;
pub use timer::DeferredFlush;

use crate::action::{Action, ActionLog, MouseButton, Position};
use crate::capture::input::types::{InputEvent, InputHandler, InputKind, Key};
use crate::clock::Epoch;
use parking_lot::Mutex as ParkingMutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Coalescing and sampling thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Keyboard burst ends after this much silence
    pub keyboard_idle: Duration,
    /// Scroll burst ends after this much silence
    pub scroll_flush_delay: Duration,
    /// Press/release distance (normalized, either axis) above which a click becomes a drag
    pub drag_threshold: f64,
    /// Distance from the scroll anchor (normalized, either axis) that starts a new burst
    pub scroll_anchor_threshold: f64,
    pub record_mouse_moves: bool,
    /// Minimum spacing between logged mouse moves; zero logs every move
    pub mouse_move_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            keyboard_idle: Duration::from_secs(5),
            scroll_flush_delay: Duration::from_millis(500),
            drag_threshold: 0.01,
            scroll_anchor_threshold: 0.01,
            record_mouse_moves: true,
            mouse_move_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct AggregatorState {
    log: ActionLog,
    keyboard: KeyboardBuffer,
    scroll: ScrollBurst,
    gestures: GestureClassifier,
    last_time: f64,
    last_move_at: Option<Instant>,
    closed: bool,
}

impl AggregatorState {
    fn new(config: &AggregatorConfig) -> Self {
        Self {
            log: ActionLog::new(),
            keyboard: KeyboardBuffer::new(),
            scroll: ScrollBurst::new(),
            gestures: GestureClassifier::new(config.drag_threshold),
            last_time: 0.0,
            last_move_at: None,
            closed: false,
        }
    }

    fn emit(&mut self, action: Option<Action>) -> bool {
        match action {
            Some(action) => {
                self.log.push(action);
                true
            }
            None => false,
        }
    }

    fn observe(&mut self, time: f64) {
        if time > self.last_time {
            self.last_time = time;
        }
    }

    /// Lazy idle checks run ahead of every incoming event. `time` is the
    /// relative time of `now` and ends whatever is flushed.
    fn flush_idle(&mut self, now: Instant, time: f64, config: &AggregatorConfig) -> usize {
        let keyboard = self.keyboard.flush_if_idle(now, config.keyboard_idle, time);
        let scroll = self
            .scroll
            .flush_if_stale(now, config.scroll_flush_delay, time);
        self.emit_in_start_order(keyboard, scroll)
    }

    /// Unconditional flush of both bursts, ending at `time`
    fn flush_bursts(&mut self, time: f64) -> usize {
        let keyboard = self.keyboard.flush(time);
        let scroll = self.scroll.flush(time);
        self.emit_in_start_order(keyboard, scroll)
    }

    fn emit_in_start_order(&mut self, a: Option<Action>, b: Option<Action>) -> usize {
        let swap = matches!((&a, &b), (Some(x), Some(y)) if y.start_time() < x.start_time());
        let (first, second) = if swap { (b, a) } else { (a, b) };
        usize::from(self.emit(first)) + usize::from(self.emit(second))
    }
}

pub struct EventAggregator {
    epoch: Epoch,
    config: AggregatorConfig,
    state: Arc<ParkingMutex<AggregatorState>>,
    scroll_timer: Option<DeferredFlush>,
}

impl EventAggregator {
    /// Aggregator without a deferred scroll timer; scroll bursts are flushed
    /// only by later events, [`flush_idle`](Self::flush_idle) or
    /// [`finish`](Self::finish).
    pub fn new(epoch: Epoch, config: AggregatorConfig) -> Self {
        let state = Arc::new(ParkingMutex::new(AggregatorState::new(&config)));
        Self {
            epoch,
            config,
            state,
            scroll_timer: None,
        }
    }

    /// Aggregator whose scroll bursts are also flushed by a rearm-able timer
    pub fn with_deferred_flush(epoch: Epoch, config: AggregatorConfig) -> std::io::Result<Self> {
        let mut aggregator = Self::new(epoch, config);
        let weak: Weak<ParkingMutex<AggregatorState>> = Arc::downgrade(&aggregator.state);
        let delay = aggregator.config.scroll_flush_delay;
        let epoch = aggregator.epoch;
        let timer = DeferredFlush::spawn("scroll-flush", delay, move |now| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mut state = state.lock();
            if state.closed {
                return;
            }
            let action = state
                .scroll
                .flush_if_stale(now, delay, epoch.relative_at(now));
            state.emit(action);
        })?;
        aggregator.scroll_timer = Some(timer);
        Ok(aggregator)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn on_key_down(&self, key: Key, at: Instant) {
        let time = self.epoch.relative_at(at);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.observe(time);
        state.flush_idle(at, time, &self.config);

        let scroll = state.scroll.flush(time);
        state.emit(scroll);

        match key {
            Key::Char(c) => state.keyboard.push(c, time, at),
            Key::Special(key_identifier) => {
                let pending = state.keyboard.flush(time);
                state.emit(pending);
                state.emit(Some(Action::SpecialKey {
                    time,
                    key_identifier,
                }));
            }
        }
    }

    pub fn on_click(&self, button: MouseButton, position: Position, pressed: bool, at: Instant) {
        let time = self.epoch.relative_at(at);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.observe(time);
        state.flush_idle(at, time, &self.config);
        state.flush_bursts(time);

        if pressed {
            state.gestures.press(button, position, time);
        } else {
            let action = state.gestures.release(button, position, time);
            state.emit(action);
        }
    }

    pub fn on_scroll(&self, position: Position, delta_y: i64, at: Instant) {
        let time = self.epoch.relative_at(at);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.observe(time);
        state.flush_idle(at, time, &self.config);

        let pending = state.keyboard.flush(time);
        state.emit(pending);

        if delta_y == 0 {
            return;
        }
        let flushed = state.scroll.add(
            position,
            delta_y,
            time,
            at,
            self.config.scroll_anchor_threshold,
        );
        state.emit(flushed);

        if let Some(timer) = &self.scroll_timer {
            timer.rearm_at(at + self.config.scroll_flush_delay);
        }
    }

    pub fn on_mouse_move(&self, position: Position, at: Instant) {
        let time = self.epoch.relative_at(at);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.observe(time);
        state.flush_idle(at, time, &self.config);

        if !self.config.record_mouse_moves {
            return;
        }
        if let Some(last) = state.last_move_at {
            if at.saturating_duration_since(last) < self.config.mouse_move_interval {
                return;
            }
        }
        state.last_move_at = Some(at);
        state.emit(Some(Action::MouseMove { time, position }));
    }

    /// Run the idle checks for both modalities. Returns the number of
    /// actions finalized; a repeated call without new input returns 0.
    pub fn flush_idle(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        state.flush_idle(now, self.epoch.relative_at(now), &self.config)
    }

    /// Body of the deferred scroll flush
    pub fn flush_stale_scroll(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let action = state.scroll.flush_if_stale(
            now,
            self.config.scroll_flush_delay,
            self.epoch.relative_at(now),
        );
        state.emit(action)
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Copy of the actions finalized so far
    pub fn snapshot(&self) -> Vec<Action> {
        self.state.lock().log.snapshot()
    }

    /// Quiesce the aggregator: stop the deferred timer, flush pending bursts
    /// at the last known relative time, refuse further events, and hand over
    /// the log. Later calls return an empty log.
    pub fn finish(&self) -> Vec<Action> {
        if let Some(timer) = &self.scroll_timer {
            timer.shutdown();
        }
        let mut state = self.state.lock();
        if state.closed {
            return Vec::new();
        }
        let end_time = state.last_time;
        let flushed = state.flush_bursts(end_time);
        state.gestures.clear();
        state.closed = true;
        tracing::debug!(
            "Aggregator finished at t={:.3}s ({} trailing actions flushed)",
            state.last_time,
            flushed
        );
        std::mem::take(&mut state.log).into_actions()
    }
}

impl InputHandler for EventAggregator {
    fn handle(&self, event: InputEvent) {
        match event.kind {
            InputKind::KeyDown(key) => self.on_key_down(key, event.at),
            InputKind::Button {
                button,
                pressed,
                position,
            } => self.on_click(button, position, pressed, event.at),
            InputKind::Wheel { position, delta_y } => self.on_scroll(position, delta_y, event.at),
            InputKind::Move { position } => self.on_mouse_move(position, event.at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        base: Instant,
        aggregator: EventAggregator,
    }

    impl Harness {
        fn new(config: AggregatorConfig) -> Self {
            let base = Instant::now();
            Self {
                base,
                aggregator: EventAggregator::new(Epoch::at(base), config),
            }
        }

        fn at(&self, seconds: f64) -> Instant {
            self.base + Duration::from_secs_f64(seconds)
        }

        fn key(&self, c: char, t: f64) {
            self.aggregator.on_key_down(Key::Char(c), self.at(t));
        }

        fn click(&self, x: f64, y: f64, t_press: f64, t_release: f64) {
            self.press(x, y, t_press);
            self.release(x, y, t_release);
        }

        fn press(&self, x: f64, y: f64, t: f64) {
            self.aggregator
                .on_click(MouseButton::Left, Position::new(x, y), true, self.at(t));
        }

        fn release(&self, x: f64, y: f64, t: f64) {
            self.aggregator
                .on_click(MouseButton::Left, Position::new(x, y), false, self.at(t));
        }

        fn scroll(&self, dy: i64, t: f64) {
            self.aggregator
                .on_scroll(Position::new(0.5, 0.5), dy, self.at(t));
        }
    }

    fn kinds(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(Action::kind).collect()
    }

    #[test]
    fn test_typed_word_then_click() {
        let h = Harness::new(AggregatorConfig::default());
        for (i, c) in "hello".chars().enumerate() {
            h.key(c, 1.0 + i as f64 * 0.2);
        }
        h.click(0.3, 0.3, 3.0, 3.1);

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["key_press", "click"]);
        assert!(matches!(
            &actions[0],
            Action::KeyPress { text, start_time, .. } if text == "hello" && (*start_time - 1.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_mouse_only_sequences_produce_mouse_actions() {
        let h = Harness::new(AggregatorConfig::default());
        h.aggregator
            .on_mouse_move(Position::new(0.1, 0.1), h.at(0.1));
        h.click(0.2, 0.2, 0.5, 0.6);
        h.press(0.2, 0.2, 1.0);
        h.release(0.2, 0.215, 1.4);
        h.press(0.4, 0.4, 2.0);
        h.release(0.405, 0.405, 2.1);

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["mouse_move", "click", "drag", "click"]);
    }

    #[test]
    fn test_special_key_flushes_pending_text_first() {
        let h = Harness::new(AggregatorConfig::default());
        h.key('a', 0.1);
        h.key('b', 0.2);
        h.aggregator
            .on_key_down(Key::Special("Enter".to_string()), h.at(0.3));
        h.key('c', 0.4);

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["key_press", "special_key", "key_press"]);
        assert!(matches!(&actions[0], Action::KeyPress { text, .. } if text == "ab"));
        assert!(matches!(&actions[2], Action::KeyPress { text, .. } if text == "c"));
    }

    #[test]
    fn test_keyboard_idle_flush_on_next_event() {
        let h = Harness::new(AggregatorConfig::default());
        h.key('x', 0.0);
        h.key('y', 6.0);

        assert_eq!(h.aggregator.len(), 1);
        let actions = h.aggregator.finish();
        assert!(matches!(
            &actions[0],
            Action::KeyPress { text, end_time, .. } if text == "x" && (*end_time - 6.0).abs() < 1e-6
        ));
        assert!(matches!(&actions[1], Action::KeyPress { text, .. } if text == "y"));
    }

    #[test]
    fn test_burst_ends_when_finalized() {
        let h = Harness::new(AggregatorConfig::default());
        h.key('a', 0.1);
        h.key('b', 0.2);
        h.aggregator
            .on_key_down(Key::Special("Enter".to_string()), h.at(3.0));

        let actions = h.aggregator.snapshot();
        match &actions[0] {
            Action::KeyPress {
                start_time,
                end_time,
                text,
            } => {
                assert_eq!(text, "ab");
                assert!((start_time - 0.1).abs() < 1e-6);
                assert!((end_time - 3.0).abs() < 1e-6);
            }
            other => panic!("expected key press, got {:?}", other),
        }
        assert!(matches!(&actions[1], Action::SpecialKey { time, .. } if (*time - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_finish_ends_trailing_bursts_at_last_known_time() {
        let h = Harness::new(AggregatorConfig::default());
        h.scroll(1, 0.5);
        h.aggregator
            .on_key_down(Key::Char('k'), h.at(0.6));
        h.aggregator
            .on_mouse_move(Position::new(0.2, 0.2), h.at(2.5));

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["scroll", "mouse_move", "key_press"]);
        assert!(matches!(actions[0], Action::Scroll { end_time, .. } if (end_time - 0.6).abs() < 1e-6));
        assert!(matches!(actions[2], Action::KeyPress { end_time, .. } if (end_time - 2.5).abs() < 1e-6));
    }

    #[test]
    fn test_idle_flush_is_idempotent() {
        let h = Harness::new(AggregatorConfig::default());
        h.key('q', 0.0);

        assert_eq!(h.aggregator.flush_idle(h.at(10.0)), 1);
        assert_eq!(h.aggregator.flush_idle(h.at(10.0)), 0);
        assert_eq!(h.aggregator.len(), 1);
    }

    #[test]
    fn test_scroll_burst_and_direction_flip() {
        let h = Harness::new(AggregatorConfig::default());
        h.scroll(1, 1.0);
        h.scroll(1, 1.1);
        h.scroll(1, 1.2);
        assert_eq!(h.aggregator.len(), 0);

        h.scroll(-1, 1.3);
        assert_eq!(h.aggregator.len(), 1);
        assert!(h.aggregator.flush_stale_scroll(h.at(2.0)));
        assert!(!h.aggregator.flush_stale_scroll(h.at(2.0)));

        let actions = h.aggregator.finish();
        let amounts: Vec<i64> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Scroll { total_amount, .. } => Some(*total_amount),
                _ => None,
            })
            .collect();
        assert_eq!(amounts, vec![3, -1]);
    }

    #[test]
    fn test_scroll_stale_burst_flushed_by_later_event() {
        let h = Harness::new(AggregatorConfig::default());
        h.scroll(2, 1.0);
        h.aggregator
            .on_mouse_move(Position::new(0.9, 0.9), h.at(1.8));

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["scroll", "mouse_move"]);
    }

    #[test]
    fn test_press_flushes_keyboard_and_scroll() {
        let h = Harness::new(AggregatorConfig::default());
        h.scroll(-1, 0.5);
        h.key('z', 0.6);
        h.press(0.1, 0.1, 0.7);
        assert_eq!(kinds(&h.aggregator.snapshot()), vec!["scroll", "key_press"]);
    }

    #[test]
    fn test_finish_flushes_trailing_bursts_and_closes() {
        let h = Harness::new(AggregatorConfig::default());
        h.key('a', 0.1);
        h.press(0.5, 0.5, 0.2);

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["key_press"]);
        assert!(h.aggregator.is_closed());

        h.key('b', 0.3);
        assert!(h.aggregator.finish().is_empty());
    }

    #[test]
    fn test_mouse_move_sampling_policy() {
        let config = AggregatorConfig {
            mouse_move_interval: Duration::from_millis(100),
            ..AggregatorConfig::default()
        };
        let h = Harness::new(config);
        for i in 0..10 {
            h.aggregator
                .on_mouse_move(Position::new(0.5, 0.5), h.at(i as f64 * 0.03));
        }
        // moves at 0.00, 0.12, 0.24 pass the 100ms spacing
        assert_eq!(h.aggregator.len(), 3);

        let off = Harness::new(AggregatorConfig {
            record_mouse_moves: false,
            ..AggregatorConfig::default()
        });
        off.aggregator
            .on_mouse_move(Position::new(0.5, 0.5), off.at(0.1));
        assert!(off.aggregator.is_empty());
    }

    #[test]
    fn test_deferred_timer_flushes_scroll() {
        let epoch = Epoch::at(Instant::now());
        let config = AggregatorConfig {
            scroll_flush_delay: Duration::from_millis(40),
            ..AggregatorConfig::default()
        };
        let aggregator = EventAggregator::with_deferred_flush(epoch, config).unwrap();
        for _ in 0..3 {
            aggregator.on_scroll(Position::new(0.5, 0.5), 1, Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(250));

        let actions = aggregator.snapshot();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Scroll { total_amount: 3, .. }));
        assert_eq!(aggregator.finish().len(), 1);
    }

    #[test]
    fn test_concurrent_listeners_lose_and_duplicate_nothing() {
        let epoch = Epoch::at(Instant::now());
        let config = AggregatorConfig {
            scroll_flush_delay: Duration::from_millis(20),
            ..AggregatorConfig::default()
        };
        let aggregator = Arc::new(EventAggregator::with_deferred_flush(epoch, config).unwrap());
        const PER_THREAD: usize = 25;

        let mut workers = Vec::new();
        for letters in ["abcde", "vwxyz"] {
            let aggregator = aggregator.clone();
            workers.push(std::thread::spawn(move || {
                for (i, c) in letters.chars().cycle().take(PER_THREAD).enumerate() {
                    aggregator.on_key_down(Key::Char(c), Instant::now());
                    std::thread::sleep(Duration::from_millis((i % 4 * 8) as u64));
                }
            }));
        }
        for _ in 0..2 {
            let aggregator = aggregator.clone();
            workers.push(std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    aggregator.on_scroll(Position::new(0.5, 0.5), 1, Instant::now());
                    std::thread::sleep(Duration::from_millis((i % 3 * 12) as u64));
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let actions = aggregator.finish();
        let mut typed: Vec<char> = actions
            .iter()
            .filter_map(|a| match a {
                Action::KeyPress { text, .. } => Some(text.chars()),
                _ => None,
            })
            .flatten()
            .collect();
        typed.sort_unstable();
        let mut expected: Vec<char> = "abcde"
            .chars()
            .cycle()
            .take(PER_THREAD)
            .chain("vwxyz".chars().cycle().take(PER_THREAD))
            .collect();
        expected.sort_unstable();
        assert_eq!(typed, expected);

        let scrolled: i64 = actions
            .iter()
            .filter_map(|a| match a {
                Action::Scroll { total_amount, .. } => Some(*total_amount),
                _ => None,
            })
            .sum();
        assert_eq!(scrolled, 2 * PER_THREAD as i64);
        assert!(actions.iter().all(|a| a.end_time() >= a.start_time()));
    }

    #[test]
    fn test_handle_dispatches_input_events() {
        let h = Harness::new(AggregatorConfig::default());
        h.aggregator.handle(InputEvent::new(
            InputKind::KeyDown(Key::Special("Escape".to_string())),
            h.at(0.5),
        ));
        h.aggregator.handle(InputEvent::new(
            InputKind::Button {
                button: MouseButton::Right,
                pressed: true,
                position: Position::new(0.5, 0.5),
            },
            h.at(1.0),
        ));
        h.aggregator.handle(InputEvent::new(
            InputKind::Button {
                button: MouseButton::Right,
                pressed: false,
                position: Position::new(0.5, 0.5),
            },
            h.at(1.1),
        ));

        let actions = h.aggregator.finish();
        assert_eq!(kinds(&actions), vec!["special_key", "click"]);
        assert!(matches!(
            actions[1],
            Action::Click {
                button: MouseButton::Right,
                ..
            }
        ));
    }
}
