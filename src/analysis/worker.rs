use crate::analysis::AnalysisService;
use crate::artifact::{CaptureArtifact, StreamKind};
use crate::error::{AnalysisError, GuardianError, Result};
use crate::lifecycle::{LifecycleState, StateCell};
use crate::queue::ArtifactConsumer;
use crate::storage::DataLayout;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dequeue poll window; also how often the loop re-checks its running flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Stop deadline. Generous because draining may include in-flight service
/// calls.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-stream analysis worker.
///
/// Consumes artifacts in FIFO order, sends each to the [`AnalysisService`],
/// and appends the result to the stream's per-day aggregate file. Dequeue is
/// at-most-once: an artifact whose analysis fails is logged and dropped,
/// never requeued. On stop the worker keeps consuming until the queue is
/// empty before exiting.
pub struct AnalysisWorker {
    stream: StreamKind,
    service: Arc<dyn AnalysisService>,
    layout: DataLayout,
    prompt: String,
    retain_artifacts: bool,
    state: StateCell,
    running: Arc<AtomicBool>,
    consumer: Mutex<Option<ArtifactConsumer>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisWorker {
    /// `prompt` is the instruction for vision (screen) or text (keyboard)
    /// analysis; the audio path ignores it.
    pub fn new(
        stream: StreamKind,
        service: Arc<dyn AnalysisService>,
        layout: DataLayout,
        consumer: ArtifactConsumer,
        prompt: String,
        retain_artifacts: bool,
    ) -> Self {
        Self {
            stream,
            service,
            layout,
            prompt,
            retain_artifacts,
            state: StateCell::new(),
            running: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(Some(consumer)),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if matches!(
            self.state.get(),
            LifecycleState::Starting | LifecycleState::Running
        ) {
            info!(stream = %self.stream, "Worker already running, start is a no-op");
            return Ok(());
        }
        self.state.transition(LifecycleState::Starting)?;

        let consumer = self.consumer.lock().take().ok_or_else(|| {
            GuardianError::component(
                format!("{}_worker", self.stream),
                "queue consumer already taken".to_string(),
            )
        })?;

        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(consumer).await });
        *self.task.lock() = Some(task);
        self.state.transition(LifecycleState::Running)?;
        info!(stream = %self.stream, "Analysis worker started");
        Ok(())
    }

    /// Signal the loop to finish and wait for it to drain the queue. On
    /// deadline miss the task is abandoned and an error returned.
    pub async fn stop(&self) -> Result<()> {
        let current = self.state.get();
        if matches!(current, LifecycleState::Stopped | LifecycleState::Stopping) {
            return Ok(());
        }
        self.state.transition(LifecycleState::Stopping)?;
        self.running.store(false, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(WORKER_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(stream = %self.stream, "Worker task panicked: {}", e),
                Err(_) => {
                    warn!(
                        stream = %self.stream,
                        "Worker did not drain within {}s, abandoning",
                        WORKER_STOP_TIMEOUT.as_secs()
                    );
                    self.state.force(LifecycleState::Stopped);
                    return Err(GuardianError::LifecycleTimeout {
                        component: match self.stream {
                            StreamKind::Audio => "audio_worker",
                            StreamKind::Screen => "screen_worker",
                            StreamKind::Keyboard => "keyboard_worker",
                        },
                        timeout_secs: WORKER_STOP_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        self.state.transition(LifecycleState::Stopped)?;
        info!(stream = %self.stream, "Analysis worker stopped");
        Ok(())
    }

    async fn run(&self, mut consumer: ArtifactConsumer) {
        loop {
            if !self.running.load(Ordering::SeqCst) && consumer.is_empty() {
                break;
            }
            if let Some(artifact) = consumer.dequeue(DEQUEUE_TIMEOUT).await {
                // Per-item isolation: a failed artifact never stops the loop.
                if let Err(e) = self.process(&artifact).await {
                    error!(
                        stream = %self.stream,
                        path = %artifact.path.display(),
                        "Analysis failed, dropping artifact: {}", e
                    );
                }
            }
        }
        debug!(stream = %self.stream, "Worker loop drained and exited");
    }

    async fn process(&self, artifact: &CaptureArtifact) -> Result<()> {
        debug!(stream = %self.stream, path = %artifact.path.display(), "Analyzing artifact");

        let text = match self.stream {
            StreamKind::Audio => self.service.transcribe(&artifact.path).await?,
            StreamKind::Screen => {
                self.service
                    .describe_image(&artifact.path, &self.prompt)
                    .await?
            }
            StreamKind::Keyboard => {
                let content = tokio::fs::read_to_string(&artifact.path)
                    .await
                    .map_err(|source| AnalysisError::ArtifactRead {
                        path: artifact.path.display().to_string(),
                        source,
                    })?;
                self.service.complete(&self.prompt, &content).await?
            }
        };

        if text.is_empty() {
            debug!(stream = %self.stream, "Empty analysis result, nothing to append");
        } else {
            let aggregate = self.layout.aggregate_file(self.stream, &artifact.day_key);
            let label = artifact.captured_at.format("%H:%M:%S").to_string();
            self.layout.append_entry(&aggregate, &label, &text)?;
        }

        if !self.retain_artifacts {
            if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                warn!(
                    path = %artifact.path.display(),
                    "Failed to remove analyzed artifact: {}", e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::artifact_queue;
    use async_trait::async_trait;
    use chrono::Local;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct StubService {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl StubService {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }

        fn next(&self) -> std::result::Result<String, AnalysisError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(n) {
                return Err(AnalysisError::Service {
                    status: 500,
                    message: "internal".to_string(),
                });
            }
            Ok(format!("analysis-{n}"))
        }
    }

    #[async_trait]
    impl AnalysisService for StubService {
        async fn transcribe(&self, _audio: &Path) -> std::result::Result<String, AnalysisError> {
            self.next()
        }

        async fn describe_image(
            &self,
            _image: &Path,
            _prompt: &str,
        ) -> std::result::Result<String, AnalysisError> {
            self.next()
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _user_content: &str,
        ) -> std::result::Result<String, AnalysisError> {
            self.next()
        }
    }

    fn artifact(tmp: &TempDir, stream: StreamKind, tag: &str) -> CaptureArtifact {
        let path = tmp.path().join(format!("{tag}.dat"));
        std::fs::write(&path, tag).unwrap();
        CaptureArtifact::new(stream, path, Local::now())
    }

    #[tokio::test]
    async fn test_stop_drains_pending_items() {
        let tmp = TempDir::new().unwrap();
        let (queue, consumer) = artifact_queue(StreamKind::Screen);
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Screen,
            Arc::new(StubService::ok()),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            "describe".to_string(),
            true,
        ));

        let items: Vec<_> = (0..5).map(|i| artifact(&tmp, StreamKind::Screen, &format!("s{i}"))).collect();
        let day = items[0].day_key.clone();
        for item in items {
            queue.enqueue(item);
        }

        worker.start().await.unwrap();
        worker.stop().await.unwrap();

        assert_eq!(queue.len(), 0);
        let aggregate = DataLayout::new(tmp.path().join("data")).aggregate_file(StreamKind::Screen, &day);
        let content = std::fs::read_to_string(aggregate).unwrap();
        for i in 0..5 {
            assert!(content.contains(&format!("analysis-{i}")));
        }
    }

    #[tokio::test]
    async fn test_items_enqueued_after_stop_are_not_processed() {
        let tmp = TempDir::new().unwrap();
        let (queue, consumer) = artifact_queue(StreamKind::Screen);
        let service = Arc::new(StubService::ok());
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Screen,
            service.clone(),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            "describe".to_string(),
            true,
        ));

        let day = crate::storage::today_key();
        for i in 0..2 {
            queue.enqueue(artifact(&tmp, StreamKind::Screen, &format!("s{i}")));
        }

        worker.start().await.unwrap();
        worker.stop().await.unwrap();

        // The drain is over; a late arrival just sits in the queue.
        queue.enqueue(artifact(&tmp, StreamKind::Screen, "late"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 1);
        let aggregate =
            DataLayout::new(tmp.path().join("data")).aggregate_file(StreamKind::Screen, &day);
        let content = std::fs::read_to_string(aggregate).unwrap();
        assert!(!content.contains("analysis-2"));
    }

    #[tokio::test]
    async fn test_failed_item_is_dropped_and_loop_continues() {
        let tmp = TempDir::new().unwrap();
        let (queue, consumer) = artifact_queue(StreamKind::Audio);
        let service = Arc::new(StubService {
            calls: AtomicUsize::new(0),
            fail_on: Some(2),
        });
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Audio,
            service.clone(),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            String::new(),
            true,
        ));

        let day = crate::storage::today_key();
        for i in 0..5 {
            queue.enqueue(artifact(&tmp, StreamKind::Audio, &format!("a{i}")));
        }

        worker.start().await.unwrap();
        worker.stop().await.unwrap();

        assert_eq!(service.calls.load(Ordering::SeqCst), 5);
        let aggregate = DataLayout::new(tmp.path().join("data")).aggregate_file(StreamKind::Audio, &day);
        let content = std::fs::read_to_string(aggregate).unwrap();
        assert!(content.contains("analysis-1"));
        assert!(!content.contains("analysis-2"));
        assert!(content.contains("analysis-3"));
    }

    #[tokio::test]
    async fn test_ephemeral_artifact_removed_after_analysis() {
        let tmp = TempDir::new().unwrap();
        let (queue, consumer) = artifact_queue(StreamKind::Keyboard);
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Keyboard,
            Arc::new(StubService::ok()),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            "summarize keys".to_string(),
            false,
        ));

        let item = artifact(&tmp, StreamKind::Keyboard, "k0");
        let path = item.path.clone();
        queue.enqueue(item);

        worker.start().await.unwrap();
        worker.stop().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_retained_artifact_survives_analysis() {
        let tmp = TempDir::new().unwrap();
        let (queue, consumer) = artifact_queue(StreamKind::Audio);
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Audio,
            Arc::new(StubService::ok()),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            String::new(),
            true,
        ));

        let item = artifact(&tmp, StreamKind::Audio, "a0");
        let path = item.path.clone();
        queue.enqueue(item);

        worker.start().await.unwrap();
        worker.stop().await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_double_start_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (_queue, consumer) = artifact_queue(StreamKind::Screen);
        let worker = Arc::new(AnalysisWorker::new(
            StreamKind::Screen,
            Arc::new(StubService::ok()),
            DataLayout::new(tmp.path().join("data")),
            consumer,
            "p".to_string(),
            true,
        ));

        worker.start().await.unwrap();
        worker.start().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Running);
        worker.stop().await.unwrap();
    }
}
