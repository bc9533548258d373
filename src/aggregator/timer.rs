//! Rearm-able one-shot timer
//!
//! One worker thread per timer. `rearm` moves the single deadline forward
//! instead of spawning a new timer per event; when the deadline passes the
//! callback runs once on the worker thread with no timer lock held.

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerSlot {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    slot: ParkingMutex<TimerSlot>,
    wake: Condvar,
}

pub struct DeferredFlush {
    delay: Duration,
    shared: Arc<TimerShared>,
    handle: ParkingMutex<Option<JoinHandle<()>>>,
}

impl DeferredFlush {
    /// Spawn the worker thread. `on_fire` receives the instant the deadline
    /// was observed to have passed.
    pub fn spawn<F>(name: &str, delay: Duration, on_fire: F) -> std::io::Result<Self>
    where
        F: Fn(Instant) + Send + 'static,
    {
        let shared = Arc::new(TimerShared::default());
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_timer(&worker_shared, on_fire))?;

        Ok(Self {
            delay,
            shared,
            handle: ParkingMutex::new(Some(handle)),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule the callback `delay` from now, replacing any pending deadline
    pub fn rearm(&self) {
        self.rearm_at(Instant::now() + self.delay);
    }

    pub fn rearm_at(&self, deadline: Instant) {
        let mut slot = self.shared.slot.lock();
        if slot.shutdown {
            return;
        }
        slot.deadline = Some(deadline);
        self.shared.wake.notify_one();
    }

    pub fn cancel(&self) {
        let mut slot = self.shared.slot.lock();
        slot.deadline = None;
        self.shared.wake.notify_one();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.slot.lock().deadline.is_some()
    }

    /// Stop the worker and join it. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut slot = self.shared.slot.lock();
            slot.shutdown = true;
            slot.deadline = None;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Deferred flush timer thread panicked");
            }
        }
    }
}

impl Drop for DeferredFlush {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer<F: Fn(Instant)>(shared: &TimerShared, on_fire: F) {
    let mut slot = shared.slot.lock();
    loop {
        if slot.shutdown {
            break;
        }
        match slot.deadline {
            None => shared.wake.wait(&mut slot),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    slot.deadline = None;
                    drop(slot);
                    on_fire(now);
                    slot = shared.slot.lock();
                } else {
                    let _ = shared.wake.wait_until(&mut slot, deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(delay: Duration) -> (DeferredFlush, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = DeferredFlush::spawn("test-timer", delay, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (timer, fired)
    }

    #[test]
    fn test_fires_once_after_delay() {
        let (timer, fired) = counting_timer(Duration::from_millis(20));
        timer.rearm();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
        timer.shutdown();
    }

    #[test]
    fn test_rearm_coalesces_into_single_fire() {
        let (timer, fired) = counting_timer(Duration::from_millis(60));
        for _ in 0..5 {
            timer.rearm();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        timer.shutdown();
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let (timer, fired) = counting_timer(Duration::from_millis(30));
        timer.rearm();
        timer.cancel();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timer.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_disarms() {
        let (timer, fired) = counting_timer(Duration::from_millis(10));
        timer.shutdown();
        timer.shutdown();
        timer.rearm();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
