//! Capture-monitor channel
//!
//! Owns the external screen capture process for one session. A dedicated
//! monitor thread spawns nothing itself but holds the [`Child`] exclusively:
//! it waits for the start marker on the process's diagnostic stream, sets the
//! session epoch, watches for unexpected exit while recording, and on stop
//! asks the process to quit (`q` on stdin) before escalating to a kill.

use crate::capture::process::CaptureLauncher;
use crate::clock::{Clock, Epoch};
use crate::recorder::channel::{ChannelType, RecordingChannel, RecordingError, RecordingResult};
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Diagnostic lines kept for crash reports
const STDERR_TAIL: usize = 8;

/// Timing and marker settings of the capture monitor
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Substring of a diagnostic line that confirms frames are flowing
    pub start_marker: String,
    pub start_timeout: Duration,
    /// Grace period after the quit request before the process is killed
    pub stop_timeout: Duration,
    /// How often the monitor checks for a stop request or process exit
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            start_marker: "frame".to_string(),
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct CaptureChannel {
    id: String,
    launcher: Arc<dyn CaptureLauncher>,
    config: CaptureConfig,
    clock: Arc<Clock>,
    video_path: PathBuf,
    is_recording: Arc<AtomicBool>,
    output_files: Arc<ParkingMutex<Vec<String>>>,
    stop_tx: ParkingMutex<Option<Sender<()>>>,
    monitor: Option<JoinHandle<RecordingResult<()>>>,
    epoch: Option<Epoch>,
}

impl CaptureChannel {
    pub fn new(
        launcher: Arc<dyn CaptureLauncher>,
        config: CaptureConfig,
        clock: Arc<Clock>,
        video_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: "capture".to_string(),
            launcher,
            config,
            clock,
            video_path: video_path.into(),
            is_recording: Arc::new(AtomicBool::new(false)),
            output_files: Arc::new(ParkingMutex::new(Vec::new())),
            stop_tx: ParkingMutex::new(None),
            monitor: None,
            epoch: None,
        }
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Epoch confirmed by the capture process, once started
    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    /// Ask the monitor to quit the capture process without waiting for it.
    /// [`stop`](RecordingChannel::stop) joins the monitor afterwards.
    pub fn request_stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
            tracing::debug!("Capture stop requested");
        }
    }

    /// True once the monitor thread has exited on its own (process crash)
    pub fn has_exited(&self) -> bool {
        self.monitor
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false)
    }

    async fn join_monitor(&mut self) -> RecordingResult<()> {
        let Some(handle) = self.monitor.take() else {
            return Ok(());
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(RecordingError::CaptureProcessCrashed(
                "capture monitor thread panicked".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RecordingChannel for CaptureChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Capture
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.monitor.is_some() {
            return Err(RecordingError::InvalidSessionState(
                "capture channel already started".to_string(),
            ));
        }
        self.output_files.lock().clear();

        if let Some(parent) = self.video_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut command = self.launcher.command(&self.video_path)?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = command.spawn().map_err(|e| {
            RecordingError::ConfigurationError(format!(
                "Failed to launch capture process {:?}: {}",
                command.get_program(),
                e
            ))
        })?;
        tracing::info!(
            "Capture process launched (pid={}, output={:?})",
            child.id(),
            self.video_path
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let monitor = CaptureMonitor {
            config: self.config.clone(),
            clock: self.clock.clone(),
            is_recording: self.is_recording.clone(),
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL),
        };
        let handle = std::thread::Builder::new()
            .name("capture-monitor".to_string())
            .spawn(move || monitor.run(child, ready_tx, stop_rx))?;

        *self.stop_tx.lock() = Some(stop_tx);
        self.monitor = Some(handle);

        match ready_rx.await {
            Ok(Ok(epoch)) => {
                self.epoch = Some(epoch);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop_tx.lock().take();
                let _ = self.join_monitor().await;
                Err(e)
            }
            Err(_) => {
                self.stop_tx.lock().take();
                let joined = self.join_monitor().await;
                Err(joined.err().unwrap_or_else(|| {
                    RecordingError::CaptureProcessCrashed(
                        "capture monitor exited before confirming start".to_string(),
                    )
                }))
            }
        }
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        if self.monitor.is_none() {
            return Ok(());
        }
        self.request_stop();
        let result = self.join_monitor().await;
        self.is_recording.store(false, Ordering::SeqCst);

        if result.is_ok() && self.video_path.exists() {
            self.output_files
                .lock()
                .push(self.video_path.to_string_lossy().to_string());
        }
        tracing::info!("Capture channel stopped");
        result
    }

    fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    fn output_files(&self) -> Vec<String> {
        self.output_files.lock().clone()
    }
}

/// State moved onto the monitor thread
struct CaptureMonitor {
    config: CaptureConfig,
    clock: Arc<Clock>,
    is_recording: Arc<AtomicBool>,
    stderr_tail: VecDeque<String>,
}

enum StartOutcome {
    Started,
    TimedOut,
    Exited,
}

impl CaptureMonitor {
    /// Monitor thread body. Start-phase failures are reported through
    /// `ready_tx`; the returned result covers the recording phase.
    fn run(
        mut self,
        mut child: Child,
        ready_tx: oneshot::Sender<RecordingResult<Epoch>>,
        stop_rx: Receiver<()>,
    ) -> RecordingResult<()> {
        let lines = match child.stderr.take() {
            Some(stderr) => spawn_stderr_pump(stderr),
            None => {
                kill_and_reap(&mut child);
                let _ = ready_tx.send(Err(RecordingError::ConfigurationError(
                    "capture process has no diagnostic stream".to_string(),
                )));
                return Ok(());
            }
        };

        match self.wait_for_marker(&lines) {
            StartOutcome::Started => {}
            StartOutcome::TimedOut => {
                tracing::error!(
                    "Capture process did not start within {:?}; killing it",
                    self.config.start_timeout
                );
                kill_and_reap(&mut child);
                let _ = ready_tx.send(Err(RecordingError::CaptureStartTimeout(
                    self.config.start_timeout,
                )));
                return Ok(());
            }
            StartOutcome::Exited => {
                let status = child.wait()?;
                let reason = format!(
                    "exited with {} before the start marker{}",
                    status,
                    self.tail_suffix()
                );
                tracing::error!("Capture process {}", reason);
                let _ = ready_tx.send(Err(RecordingError::CaptureProcessCrashed(reason)));
                return Ok(());
            }
        }

        let epoch = self.clock.confirm_capture_started();
        self.is_recording.store(true, Ordering::SeqCst);
        tracing::info!("Capture started; session epoch set");
        if ready_tx.send(Ok(epoch)).is_err() {
            tracing::warn!("Capture start was abandoned; shutting the process down");
            self.is_recording.store(false, Ordering::SeqCst);
            return self.shutdown(&mut child);
        }

        loop {
            match stop_rx.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.drain(&lines);
                    if let Some(status) = child.try_wait()? {
                        self.is_recording.store(false, Ordering::SeqCst);
                        let reason =
                            format!("exited with {} while recording{}", status, self.tail_suffix());
                        tracing::error!("Capture process {}", reason);
                        return Err(RecordingError::CaptureProcessCrashed(reason));
                    }
                }
            }
        }

        self.is_recording.store(false, Ordering::SeqCst);
        self.shutdown(&mut child)
    }

    fn wait_for_marker(&mut self, lines: &Receiver<String>) -> StartOutcome {
        let deadline = Instant::now() + self.config.start_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return StartOutcome::TimedOut;
            }
            match lines.recv_timeout(remaining) {
                Ok(line) => {
                    let found = line.contains(&self.config.start_marker);
                    self.remember(line);
                    if found {
                        return StartOutcome::Started;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return StartOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => return StartOutcome::Exited,
            }
        }
    }

    /// Graceful quit with a bounded wait, then kill
    fn shutdown(&mut self, child: &mut Child) -> RecordingResult<()> {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").and_then(|_| stdin.flush()) {
                tracing::debug!("Could not send quit to capture process: {}", e);
            }
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if !status.success() {
                    tracing::warn!("Capture process exited with status {}", status);
                }
                tracing::info!("Capture process finished");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        tracing::warn!(
            "Capture process ignored quit for {:?}; killing it",
            self.config.stop_timeout
        );
        kill_and_reap(child);
        Ok(())
    }

    fn drain(&mut self, lines: &Receiver<String>) {
        while let Ok(line) = lines.try_recv() {
            self.remember(line);
        }
    }

    fn remember(&mut self, line: String) {
        tracing::trace!("capture: {}", line);
        if self.stderr_tail.len() == STDERR_TAIL {
            self.stderr_tail.pop_front();
        }
        self.stderr_tail.push_back(line);
    }

    fn tail_suffix(&self) -> String {
        match self.stderr_tail.back() {
            Some(last) => format!(" (last output: {})", last.trim()),
            None => String::new(),
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Kill of capture process failed: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to reap capture process: {}", e);
    }
}

/// Forward diagnostic output as segments split on `\n` and `\r`. The pump
/// ends at end of stream or once the monitor stops listening; it is not
/// joined.
fn spawn_stderr_pump(mut stderr: ChildStderr) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("capture-stderr".to_string())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            let mut segment = Vec::new();
            loop {
                let n = match stderr.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for &byte in &buf[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        if !segment.is_empty() {
                            let line = String::from_utf8_lossy(&segment).into_owned();
                            segment.clear();
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    } else {
                        segment.push(byte);
                    }
                }
            }
            if !segment.is_empty() {
                let _ = tx.send(String::from_utf8_lossy(&segment).into_owned());
            }
        });
    if let Err(e) = spawned {
        // Without a pump the receiver reports a closed stream right away
        tracing::error!("Failed to spawn capture stderr reader: {}", e);
    }
    rx
}
