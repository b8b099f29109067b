pub mod audio;
pub mod keyboard;
pub mod screen;
pub mod source;

pub use audio::AudioRecorder;
pub use keyboard::KeyboardRecorder;
pub use screen::{PrivacyFilter, ScreenCapturer};
pub use source::{
    ActiveWindowProbe, AudioSource, CommandAudioSource, CommandScreenSource, CommandWindowProbe,
    CrosstermKeySource, KeySource, ScreenSource,
};

use crate::error::{GuardianError, Result};
use crate::lifecycle::{LifecycleState, StateCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a producer loop gets to exit after cancellation before being
/// abandoned.
pub const PRODUCER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared control block for a capture producer: lifecycle state, pause flag,
/// cancellation token, and the loop task handle.
///
/// Pause is a soft gate checked at the top of each capture tick, so an
/// in-flight capture always finishes before the pause takes effect.
pub struct ProducerControl {
    name: &'static str,
    state: StateCell,
    paused: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProducerControl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: StateCell::new(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    /// Moves into Starting and hands out a fresh cancellation token for the
    /// loop task. Returns Ok(None) if the producer is already running.
    pub fn begin_start(&self) -> Result<Option<CancellationToken>> {
        let current = self.state.get();
        if matches!(
            current,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Paused
        ) {
            info!(producer = self.name, "Already running, start is a no-op");
            return Ok(None);
        }
        self.state.transition(LifecycleState::Starting)?;
        self.paused.store(false, Ordering::SeqCst);
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        Ok(Some(token))
    }

    /// Records the spawned loop task and marks the producer Running.
    pub fn mark_running(&self, task: JoinHandle<()>) -> Result<()> {
        *self.task.lock() = Some(task);
        self.state.transition(LifecycleState::Running)?;
        info!(producer = self.name, "Started");
        Ok(())
    }

    pub fn mark_failed(&self) {
        self.state.force(LifecycleState::Failed);
    }

    /// Suspends new capture ticks. Idempotent; a no-op unless Running.
    pub fn pause(&self) {
        if self.state.transition_from(LifecycleState::Running, LifecycleState::Paused) {
            self.paused.store(true, Ordering::SeqCst);
            info!(producer = self.name, "Paused");
        }
    }

    /// Resumes capture ticks. Idempotent; a no-op unless Paused.
    pub fn resume(&self) {
        if self.state.transition_from(LifecycleState::Paused, LifecycleState::Running) {
            self.paused.store(false, Ordering::SeqCst);
            info!(producer = self.name, "Resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancels the loop and waits up to [`PRODUCER_STOP_TIMEOUT`] for it to
    /// exit. On timeout the task is abandoned and an error is returned; the
    /// producer still ends up Stopped so it can be restarted.
    pub async fn stop(&self) -> Result<()> {
        let current = self.state.get();
        if matches!(current, LifecycleState::Stopped | LifecycleState::Stopping) {
            return Ok(());
        }
        self.state.transition(LifecycleState::Stopping)?;
        self.cancel.lock().cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(PRODUCER_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(producer = self.name, "Loop task panicked: {}", e),
                Err(_) => {
                    warn!(
                        producer = self.name,
                        "Loop did not stop within {}s, abandoning",
                        PRODUCER_STOP_TIMEOUT.as_secs()
                    );
                    self.state.force(LifecycleState::Stopped);
                    return Err(GuardianError::LifecycleTimeout {
                        component: self.name,
                        timeout_secs: PRODUCER_STOP_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        self.state.transition(LifecycleState::Stopped)?;
        info!(producer = self.name, "Stopped");
        Ok(())
    }
}
