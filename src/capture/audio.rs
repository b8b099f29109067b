use crate::artifact::{CaptureArtifact, StreamKind};
use crate::capture::source::AudioSource;
use crate::capture::ProducerControl;
use crate::error::Result;
use crate::queue::ArtifactQueue;
use crate::storage::{self, DataLayout};
use chrono::Local;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How often a paused or failed audio loop re-checks before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause between consecutive chunks. Keeps the loop from monopolizing the
/// executor when the recording command returns immediately.
const CHUNK_GAP: Duration = Duration::from_millis(50);

/// Continuous audio capture in fixed-duration chunks.
///
/// Each loop iteration records one chunk through the [`AudioSource`] and
/// enqueues the resulting file. A failed chunk is logged and skipped; the
/// loop never dies on a capture error.
pub struct AudioRecorder {
    control: ProducerControl,
    source: Arc<dyn AudioSource>,
    layout: DataLayout,
    queue: ArtifactQueue,
    chunk_duration: Duration,
    file_extension: String,
}

impl AudioRecorder {
    pub fn new(
        source: Arc<dyn AudioSource>,
        layout: DataLayout,
        queue: ArtifactQueue,
        chunk_duration: Duration,
        file_extension: String,
    ) -> Self {
        Self {
            control: ProducerControl::new("audio_recorder"),
            source,
            layout,
            queue,
            chunk_duration,
            file_extension,
        }
    }

    pub fn control(&self) -> &ProducerControl {
        &self.control
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let Some(cancel) = self.control.begin_start()? else {
            return Ok(());
        };
        info!(
            chunk_secs = self.chunk_duration.as_secs(),
            "Starting audio recorder"
        );

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(cancel).await });
        self.control.mark_running(task)
    }

    pub async fn stop(&self) -> Result<()> {
        self.control.stop().await
    }

    async fn run(&self, cancel: CancellationToken) {
        let paused = self.control.pause_flag();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if paused.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => continue,
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.capture_chunk() => {
                    if let Err(e) = result {
                        error!("Audio chunk capture failed: {}", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                    } else {
                        tokio::time::sleep(CHUNK_GAP).await;
                    }
                }
            }
        }
        debug!("Audio recorder loop exited");
    }

    async fn capture_chunk(&self) -> Result<()> {
        let started = Local::now();
        let day = storage::day_key(started);
        let dir = self.layout.ensure_stream_dir(StreamKind::Audio, &day)?;
        let path = dir.join(format!(
            "audio_{}.{}",
            started.format("%Y%m%d_%H%M%S"),
            self.file_extension
        ));

        self.source.record(&path, self.chunk_duration).await?;

        debug!(path = %path.display(), "Audio chunk captured");
        self.queue
            .enqueue(CaptureArtifact::new(StreamKind::Audio, path, started));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::lifecycle::LifecycleState;
    use crate::queue::artifact_queue;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct CountingSource {
        recorded: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl AudioSource for CountingSource {
        async fn record(
            &self,
            dest: &Path,
            _duration: Duration,
        ) -> std::result::Result<(), CaptureError> {
            let n = self.recorded.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(n) {
                return Err(CaptureError::CommandFailed {
                    stream: "audio",
                    status: "exit status: 1".to_string(),
                    stderr: "device busy".to_string(),
                });
            }
            std::fs::write(dest, b"RIFF").unwrap();
            Ok(())
        }
    }

    fn recorder(tmp: &TempDir, source: CountingSource) -> (Arc<AudioRecorder>, crate::queue::ArtifactConsumer) {
        let (queue, consumer) = artifact_queue(StreamKind::Audio);
        let recorder = Arc::new(AudioRecorder::new(
            Arc::new(source),
            DataLayout::new(tmp.path()),
            queue,
            Duration::from_millis(10),
            "wav".to_string(),
        ));
        (recorder, consumer)
    }

    #[tokio::test]
    async fn test_chunks_are_enqueued_in_order() {
        let tmp = TempDir::new().unwrap();
        let (recorder, mut consumer) = recorder(
            &tmp,
            CountingSource {
                recorded: AtomicUsize::new(0),
                fail_on: None,
            },
        );

        recorder.start().await.unwrap();
        let first = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        let second = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        recorder.stop().await.unwrap();

        assert_eq!(first.stream, StreamKind::Audio);
        assert!(first.path.exists());
        assert!(first.captured_at <= second.captured_at);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_kill_loop() {
        let tmp = TempDir::new().unwrap();
        let (recorder, mut consumer) = recorder(
            &tmp,
            CountingSource {
                recorded: AtomicUsize::new(0),
                fail_on: Some(0),
            },
        );

        recorder.start().await.unwrap();
        // First attempt fails; the loop retries and the second succeeds.
        let artifact = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        recorder.stop().await.unwrap();

        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn test_instant_source_still_yields_to_stop() {
        let tmp = TempDir::new().unwrap();
        let (recorder, _consumer) = recorder(
            &tmp,
            CountingSource {
                recorded: AtomicUsize::new(0),
                fail_on: None,
            },
        );

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // The stub records without suspending; cancellation must still get
        // through between chunks.
        recorder.stop().await.unwrap();
        assert_eq!(recorder.control().state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_paused_recorder_produces_nothing() {
        let tmp = TempDir::new().unwrap();
        let (recorder, mut consumer) = recorder(
            &tmp,
            CountingSource {
                recorded: AtomicUsize::new(0),
                fail_on: None,
            },
        );

        recorder.start().await.unwrap();
        consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        recorder.control().pause();
        // Let any in-flight chunk land before draining.
        tokio::time::sleep(Duration::from_millis(100)).await;
        consumer.drain();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(consumer.is_empty());
        recorder.stop().await.unwrap();
    }
}
