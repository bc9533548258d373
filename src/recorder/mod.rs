//! Recording lifecycle
//!
//! The [`Recorder`] drives one session at a time through
//! `Idle → Starting → Recording → Stopping → Idle`. A session owns two
//! channels: the capture monitor (external capture process, session epoch)
//! and input tracking (listener plus aggregator). Capture always starts first
//! because the aggregator cannot exist before the epoch does.

pub mod channel;
pub mod state;

pub use channel::{ChannelType, RecordingChannel, RecordingError, RecordingResult};
pub use state::{OutputTarget, RecordingState, SessionHandle};

use crate::aggregator::EventAggregator;
use crate::capture::input::{InputSource, InputTrackingChannel};
use crate::capture::monitor::CaptureChannel;
use crate::capture::process::{CaptureLauncher, FfmpegLauncher};
use crate::clock::{Clock, Epoch};
use crate::config::RecorderConfig;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct ActiveSession {
    handle: SessionHandle,
    epoch: Epoch,
    capture: CaptureChannel,
    input: InputTrackingChannel,
    watchdog: Option<JoinHandle<()>>,
}

/// Unclaimed outcomes kept for sessions stopped by a restart or the watchdog
const MAX_COMPLETED_OUTCOMES: usize = 16;

#[derive(Default)]
struct RecorderInner {
    active: Option<ActiveSession>,
    /// Outcomes of sessions stopped by a restart or by the watchdog, kept
    /// until their handle is stopped or they are among the oldest beyond
    /// [`MAX_COMPLETED_OUTCOMES`]
    completed: HashMap<Uuid, RecordingResult<PathBuf>>,
    completed_order: VecDeque<Uuid>,
}

impl RecorderInner {
    fn record_outcome(&mut self, id: Uuid, outcome: RecordingResult<PathBuf>) {
        if self.completed.insert(id, outcome).is_none() {
            self.completed_order.push_back(id);
        }
        while self.completed_order.len() > MAX_COMPLETED_OUTCOMES {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
                tracing::debug!("Dropped unclaimed outcome of session {}", oldest);
            }
        }
    }

    fn take_outcome(&mut self, id: &Uuid) -> Option<RecordingResult<PathBuf>> {
        let outcome = self.completed.remove(id)?;
        self.completed_order.retain(|queued| queued != id);
        Some(outcome)
    }
}

pub struct Recorder {
    config: RecorderConfig,
    launcher: Arc<dyn CaptureLauncher>,
    input_source: Arc<dyn InputSource>,
    inner: Arc<Mutex<RecorderInner>>,
    state_tx: Arc<watch::Sender<RecordingState>>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        launcher: Arc<dyn CaptureLauncher>,
        input_source: Arc<dyn InputSource>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RecordingState::Idle);
        Self {
            config,
            launcher,
            input_source,
            inner: Arc::new(Mutex::new(RecorderInner::default())),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Recorder capturing the screen with ffmpeg as configured. Fails if the
    /// configured ffmpeg binary cannot be run.
    pub fn with_ffmpeg(
        config: RecorderConfig,
        input_source: Arc<dyn InputSource>,
    ) -> RecordingResult<Self> {
        let launcher = FfmpegLauncher::from_config(&config);
        launcher.check_available()?;
        Ok(Self::new(config, Arc::new(launcher), input_source))
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecordingState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state_tx.subscribe()
    }

    pub async fn active_session(&self) -> Option<SessionHandle> {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .map(|session| session.handle.clone())
    }

    /// Time since the active session's first captured frame
    pub async fn elapsed(&self) -> Option<Duration> {
        self.inner.lock().await.active.as_ref().map(|session| {
            Instant::now().saturating_duration_since(session.epoch.instant())
        })
    }

    /// Start a session writing to `target`. Returns once the capture process
    /// has confirmed its first frame and the input listener is attached.
    ///
    /// A session that is still active is stopped first; its outcome remains
    /// available through [`stop`](Self::stop) with its own handle.
    pub async fn start(&self, target: OutputTarget) -> RecordingResult<SessionHandle> {
        let mut inner = self.inner.lock().await;

        if let Some(previous) = inner.active.as_ref().map(|s| s.handle.clone()) {
            tracing::info!("Restart requested; stopping session {}", previous.id());
            let outcome = stop_active(&mut inner, &self.state_tx).await;
            if let Err(e) = &outcome {
                tracing::warn!("Previous session {} ended with error: {}", previous.id(), e);
            }
            inner.record_outcome(previous.id(), outcome);
        }

        set_state(&self.state_tx, RecordingState::Starting);
        match self.start_session(target).await {
            Ok(mut session) => {
                let handle = session.handle.clone();
                session.watchdog = Some(self.spawn_watchdog(handle.id()));
                inner.active = Some(session);
                set_state(&self.state_tx, RecordingState::Recording);
                tracing::info!("Recording session {} started", handle.id());
                Ok(handle)
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                set_state(&self.state_tx, RecordingState::Idle);
                Err(e)
            }
        }
    }

    /// Stop the session identified by `handle` and return the action log
    /// path once the log is on disk.
    pub async fn stop(&self, handle: &SessionHandle) -> RecordingResult<PathBuf> {
        let mut inner = self.inner.lock().await;

        let is_active = inner
            .active
            .as_ref()
            .map(|session| session.handle.id() == handle.id())
            .unwrap_or(false);
        if is_active {
            return stop_active(&mut inner, &self.state_tx).await;
        }
        if let Some(outcome) = inner.take_outcome(&handle.id()) {
            return outcome;
        }
        Err(RecordingError::InvalidSessionState(format!(
            "session {} is not active",
            handle.id()
        )))
    }

    async fn start_session(&self, target: OutputTarget) -> RecordingResult<ActiveSession> {
        let handle = SessionHandle::new(target);
        std::fs::create_dir_all(handle.directory())?;

        let clock = Arc::new(Clock::new());
        let mut capture = CaptureChannel::new(
            self.launcher.clone(),
            self.config.capture_config(),
            clock,
            handle.video_path(),
        );
        capture.start().await?;

        let epoch = match capture.epoch() {
            Some(epoch) => epoch,
            None => {
                let _ = capture.stop().await;
                return Err(RecordingError::InvalidSessionState(
                    "capture started without an epoch".to_string(),
                ));
            }
        };

        let aggregator =
            match EventAggregator::with_deferred_flush(epoch, self.config.aggregator_config()) {
                Ok(aggregator) => Arc::new(aggregator),
                Err(e) => {
                    let _ = capture.stop().await;
                    return Err(e.into());
                }
            };

        let mut input =
            InputTrackingChannel::new(self.input_source.clone(), aggregator, handle.log_path());
        if let Err(e) = input.start().await {
            tracing::error!("Input listener failed to attach; tearing down capture");
            if let Err(stop_err) = capture.stop().await {
                tracing::warn!("Capture teardown after attach failure: {}", stop_err);
            }
            return Err(e);
        }

        Ok(ActiveSession {
            handle,
            epoch,
            capture,
            input,
            watchdog: None,
        })
    }

    /// Stops the session when the max duration passes or the capture process
    /// exits on its own
    fn spawn_watchdog(&self, id: Uuid) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let state_tx = self.state_tx.clone();
        let poll = self.config.capture_config().poll_interval;
        let deadline = self.config.max_duration().map(|d| Instant::now() + d);
        tokio::spawn(watchdog(inner, state_tx, id, poll, deadline))
    }
}

async fn watchdog(
    inner: Weak<Mutex<RecorderInner>>,
    state_tx: Arc<watch::Sender<RecordingState>>,
    id: Uuid,
    poll: Duration,
    deadline: Option<Instant>,
) {
    loop {
        let wait = match deadline {
            Some(deadline) => poll.min(deadline.saturating_duration_since(Instant::now())),
            None => poll,
        };
        tokio::time::sleep(wait).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut guard = inner.lock().await;
        let Some(session) = guard.active.as_mut() else {
            return;
        };
        if session.handle.id() != id {
            return;
        }

        let expired = deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        let crashed = session.capture.has_exited();
        if !expired && !crashed {
            continue;
        }

        // Stopping from inside this task; it must not abort itself
        session.watchdog.take();
        if expired {
            tracing::info!("Max duration reached; stopping session {}", id);
        } else {
            tracing::error!("Capture process exited; stopping session {}", id);
        }
        let outcome = stop_active(&mut guard, &state_tx).await;
        guard.record_outcome(id, outcome);
        return;
    }
}

fn set_state(state_tx: &watch::Sender<RecordingState>, state: RecordingState) {
    state_tx.send_replace(state);
    tracing::debug!("Recorder state: {}", state);
}

/// Ordered teardown of the active session: ask capture to quit, detach
/// input, join the capture monitor, then finish and persist the log.
async fn stop_active(
    inner: &mut RecorderInner,
    state_tx: &watch::Sender<RecordingState>,
) -> RecordingResult<PathBuf> {
    let Some(mut session) = inner.active.take() else {
        return Err(RecordingError::InvalidSessionState(
            "no active session".to_string(),
        ));
    };
    set_state(state_tx, RecordingState::Stopping);
    if let Some(watchdog) = session.watchdog.take() {
        watchdog.abort();
    }

    session.capture.request_stop();
    session.input.detach();
    let capture_result = session.capture.stop().await;
    let persist_result = session.input.stop().await;
    set_state(state_tx, RecordingState::Idle);

    let id = session.handle.id();
    let log_path = session.handle.log_path();
    match (capture_result, persist_result) {
        (Ok(()), Ok(())) => {
            tracing::info!("Recording session {} stopped; log at {:?}", id, log_path);
            Ok(log_path)
        }
        (Err(capture_err), persisted) => {
            if persisted.is_ok() {
                tracing::warn!(
                    "Session {} capture failed; partial log kept at {:?}",
                    id,
                    log_path
                );
            }
            Err(capture_err)
        }
        (Ok(()), Err(persist_err)) => Err(persist_err),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capture::input::ManualInputSource;
    use std::path::Path;
    use std::process::Command;

    fn fake_capture(script: &'static str) -> Arc<dyn CaptureLauncher> {
        Arc::new(move |_: &Path| {
            let mut command = Command::new("sh");
            command.arg("-c").arg(script);
            command
        })
    }

    fn test_config() -> RecorderConfig {
        RecorderConfig {
            start_timeout_ms: 1_000,
            stop_timeout_ms: 500,
            monitor_poll_ms: 50,
            scroll_flush_ms: 100,
            ..RecorderConfig::default()
        }
    }

    const WELL_BEHAVED: &str = "echo 'frame=    1' >&2; read -r cmd; exit 0";

    #[test]
    fn test_unclaimed_outcomes_are_bounded() {
        let mut inner = RecorderInner::default();
        let ids: Vec<Uuid> = (0..MAX_COMPLETED_OUTCOMES + 4)
            .map(|_| Uuid::new_v4())
            .collect();
        for id in &ids {
            inner.record_outcome(*id, Ok(PathBuf::from(format!("{}.actions.json", id))));
        }

        assert_eq!(inner.completed.len(), MAX_COMPLETED_OUTCOMES);
        assert!(inner.take_outcome(&ids[0]).is_none());
        let newest = ids[ids.len() - 1];
        assert!(matches!(inner.take_outcome(&newest), Some(Ok(_))));
        assert!(inner.take_outcome(&newest).is_none());
        assert_eq!(inner.completed_order.len(), MAX_COMPLETED_OUTCOMES - 1);
    }

    #[test]
    fn test_with_ffmpeg_requires_binary() {
        let config = RecorderConfig {
            ffmpeg_path: "/nonexistent/bin/ffmpeg".to_string(),
            ..RecorderConfig::default()
        };
        let result = Recorder::with_ffmpeg(config, Arc::new(ManualInputSource::new()));
        assert!(matches!(result, Err(RecordingError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ManualInputSource::new());
        let recorder = Recorder::new(test_config(), fake_capture(WELL_BEHAVED), source);
        let mut states = recorder.subscribe();
        assert_eq!(recorder.state(), RecordingState::Idle);

        let handle = recorder
            .start(OutputTarget::new(dir.path(), "s1"))
            .await
            .unwrap();
        assert_eq!(recorder.state(), RecordingState::Recording);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), RecordingState::Recording);
        assert!(recorder.elapsed().await.is_some());

        recorder.stop(&handle).await.unwrap();
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert!(recorder.active_session().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_start_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ManualInputSource::new());
        let recorder = Recorder::new(test_config(), fake_capture("exit 1"), source.clone());

        let result = recorder.start(OutputTarget::new(dir.path(), "bad")).await;
        assert!(matches!(result, Err(RecordingError::CaptureProcessCrashed(_))));
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert!(!source.is_attached());
    }

    #[tokio::test]
    async fn test_max_duration_stops_session() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ManualInputSource::new());
        let config = RecorderConfig {
            max_duration_secs: Some(1),
            ..test_config()
        };
        let recorder = Recorder::new(config, fake_capture(WELL_BEHAVED), source);
        let mut states = recorder.subscribe();

        let handle = recorder
            .start(OutputTarget::new(dir.path(), "timed"))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == RecordingState::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        let log_path = recorder.stop(&handle).await.unwrap();
        assert!(log_path.exists());
        assert!(matches!(
            recorder.stop(&handle).await,
            Err(RecordingError::InvalidSessionState(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_crash_stops_session() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ManualInputSource::new());
        let recorder = Recorder::new(
            test_config(),
            fake_capture("echo frame >&2; sleep 0.2; exit 2"),
            source.clone(),
        );
        let mut states = recorder.subscribe();

        let handle = recorder
            .start(OutputTarget::new(dir.path(), "crash"))
            .await
            .unwrap();
        source.injector().type_text("lost?");
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == RecordingState::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(
            recorder.stop(&handle).await,
            Err(RecordingError::CaptureProcessCrashed(_))
        ));
        // Input gathered before the crash is still written
        assert!(handle.log_path().exists());
    }
}
