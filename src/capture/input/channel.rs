use crate::action::Action;
use crate::aggregator::EventAggregator;
use crate::capture::input::source::{InputListener, InputSource};
use crate::capture::input::types::InputHandler;
use crate::persist::write_action_log;
use crate::recorder::channel::{ChannelType, RecordingChannel, RecordingError, RecordingResult};
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Input tracking for one session: attaches the session's aggregator to an
/// input source and, on stop, quiesces the aggregator and writes the log.
pub struct InputTrackingChannel {
    id: String,
    source: Arc<dyn InputSource>,
    aggregator: Arc<EventAggregator>,
    log_path: PathBuf,
    is_recording: Arc<AtomicBool>,
    output_files: Arc<ParkingMutex<Vec<String>>>,
    listener: ParkingMutex<Option<Box<dyn InputListener>>>,
    finished: bool,
}

impl InputTrackingChannel {
    pub fn new(
        source: Arc<dyn InputSource>,
        aggregator: Arc<EventAggregator>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: "input".to_string(),
            source,
            aggregator,
            log_path: log_path.into(),
            is_recording: Arc::new(AtomicBool::new(false)),
            output_files: Arc::new(ParkingMutex::new(Vec::new())),
            listener: ParkingMutex::new(None),
            finished: false,
        }
    }

    pub fn aggregator(&self) -> &Arc<EventAggregator> {
        &self.aggregator
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Detach from the input source. No event reaches the aggregator after
    /// this returns. Safe to call more than once.
    pub fn detach(&self) {
        if let Some(mut listener) = self.listener.lock().take() {
            listener.stop();
            tracing::debug!("Input listener detached");
        }
        self.is_recording.store(false, Ordering::SeqCst);
    }

    fn flush_to_disk(&mut self, actions: &[Action]) -> RecordingResult<()> {
        write_action_log(&self.log_path, actions)?;
        self.output_files
            .lock()
            .push(self.log_path.to_string_lossy().to_string());
        Ok(())
    }
}

#[async_trait]
impl RecordingChannel for InputTrackingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Input
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.finished || self.listener.lock().is_some() {
            return Err(RecordingError::InvalidSessionState(
                "input channel already started".to_string(),
            ));
        }
        let handler: Arc<dyn InputHandler> = self.aggregator.clone();
        let listener = self.source.attach(handler)?;
        *self.listener.lock() = Some(listener);
        self.is_recording.store(true, Ordering::SeqCst);

        tracing::info!("Input tracking started");
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        if self.finished {
            return Ok(());
        }
        self.detach();
        self.finished = true;

        let actions = self.aggregator.finish();
        self.flush_to_disk(&actions)?;

        tracing::info!(
            "Input tracking stopped ({} actions, log={:?})",
            actions.len(),
            self.log_path
        );
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    fn output_files(&self) -> Vec<String> {
        self.output_files.lock().clone()
    }
}
