use crate::artifact::{CaptureArtifact, StreamKind};
use crate::capture::source::KeySource;
use crate::capture::ProducerControl;
use crate::error::Result;
use crate::queue::ArtifactQueue;
use crate::storage::{self, DataLayout};
use chrono::Local;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Keystroke capture with an in-memory buffer flushed to disk on a fixed
/// interval.
///
/// Fragments arrive from the [`KeySource`] and accumulate in a mutex-guarded
/// buffer. Each flush writes the buffered text to its own timestamped chunk
/// file and enqueues it; an empty buffer flushes nothing. While the recorder
/// is paused, incoming fragments are discarded rather than buffered.
pub struct KeyboardRecorder {
    control: ProducerControl,
    source: Arc<dyn KeySource>,
    layout: DataLayout,
    queue: ArtifactQueue,
    flush_interval: Duration,
    buffer: Arc<Mutex<String>>,
}

impl KeyboardRecorder {
    pub fn new(
        source: Arc<dyn KeySource>,
        layout: DataLayout,
        queue: ArtifactQueue,
        flush_interval: Duration,
    ) -> Self {
        Self {
            control: ProducerControl::new("keyboard_recorder"),
            source,
            layout,
            queue,
            flush_interval,
            buffer: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn control(&self) -> &ProducerControl {
        &self.control
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let Some(cancel) = self.control.begin_start()? else {
            return Ok(());
        };
        info!(
            flush_secs = self.flush_interval.as_secs(),
            "Starting keyboard recorder"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.source.listen(tx, cancel.child_token())?;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(cancel, rx).await });
        self.control.mark_running(task)
    }

    pub async fn stop(&self) -> Result<()> {
        let stopped = self.control.stop().await;
        // Capture whatever arrived since the last tick. Runs even when the
        // loop missed its stop deadline and was abandoned.
        self.flush();
        stopped
    }

    async fn run(&self, cancel: CancellationToken, mut rx: mpsc::UnboundedReceiver<String>) {
        let paused = self.control.pause_flag();
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval tick fires immediately; swallow it so the first
        // flush happens one full interval after start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Fragments already sitting in the channel still belong
                    // in the buffer for the final flush.
                    while let Ok(text) = rx.try_recv() {
                        if !paused.load(Ordering::SeqCst) {
                            self.buffer.lock().push_str(&text);
                        }
                    }
                    break;
                }
                fragment = rx.recv() => {
                    match fragment {
                        Some(text) if !paused.load(Ordering::SeqCst) => {
                            self.buffer.lock().push_str(&text);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = ticker.tick() => self.flush(),
            }
        }
        debug!("Keyboard recorder loop exited");
    }

    /// Write the buffered text to a chunk file and enqueue it. A no-op when
    /// the buffer holds only whitespace.
    fn flush(&self) {
        let content = std::mem::take(&mut *self.buffer.lock());
        if content.trim().is_empty() {
            return;
        }

        let flushed_at = Local::now();
        let day = storage::day_key(flushed_at);
        let result = self
            .layout
            .ensure_stream_dir(StreamKind::Keyboard, &day)
            .and_then(|dir| {
                let path = dir.join(format!("keys_{}.txt", flushed_at.format("%Y%m%d_%H%M%S")));
                let entry = format!("--- [{}] ---\n{}\n", flushed_at.format("%H:%M:%S"), content);
                std::fs::write(&path, entry)?;
                Ok(path)
            });

        match result {
            Ok(path) => {
                debug!(path = %path.display(), bytes = content.len(), "Keystroke buffer flushed");
                self.queue
                    .enqueue(CaptureArtifact::new(StreamKind::Keyboard, path, flushed_at));
            }
            Err(e) => {
                // Put the text back so the next flush retries it.
                error!("Failed to flush keystroke buffer: {}", e);
                let mut buffer = self.buffer.lock();
                let mut restored = content;
                restored.push_str(&buffer);
                *buffer = restored;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::queue::artifact_queue;
    use tempfile::TempDir;

    struct StubKeys {
        sink: Mutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl StubKeys {
        fn new() -> Self {
            Self {
                sink: Mutex::new(None),
            }
        }

        fn press(&self, text: &str) {
            let sink = self.sink.lock();
            sink.as_ref().unwrap().send(text.to_string()).unwrap();
        }
    }

    impl KeySource for StubKeys {
        fn listen(
            &self,
            sink: mpsc::UnboundedSender<String>,
            _cancel: CancellationToken,
        ) -> std::result::Result<(), CaptureError> {
            *self.sink.lock() = Some(sink);
            Ok(())
        }
    }

    fn recorder(
        tmp: &TempDir,
        source: Arc<StubKeys>,
        flush_interval: Duration,
    ) -> (Arc<KeyboardRecorder>, crate::queue::ArtifactConsumer) {
        let (queue, consumer) = artifact_queue(StreamKind::Keyboard);
        let recorder = Arc::new(KeyboardRecorder::new(
            source,
            DataLayout::new(tmp.path()),
            queue,
            flush_interval,
        ));
        (recorder, consumer)
    }

    #[tokio::test]
    async fn test_flush_writes_chunk_with_header() {
        let tmp = TempDir::new().unwrap();
        let keys = Arc::new(StubKeys::new());
        let (recorder, mut consumer) = recorder(&tmp, keys.clone(), Duration::from_millis(50));

        recorder.start().await.unwrap();
        keys.press("hel");
        keys.press("lo\n");

        let artifact = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        recorder.stop().await.unwrap();

        assert_eq!(artifact.stream, StreamKind::Keyboard);
        let written = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(written.starts_with("--- ["));
        assert!(written.contains("hello\n"));
        assert_eq!(recorder.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_buffer_flushes_nothing() {
        let tmp = TempDir::new().unwrap();
        let keys = Arc::new(StubKeys::new());
        let (recorder, consumer) = recorder(&tmp, keys, Duration::from_millis(20));

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        recorder.stop().await.unwrap();

        assert!(consumer.is_empty());
        assert!(!tmp.path().join("keyboard").exists());
    }

    #[tokio::test]
    async fn test_stop_flushes_fragments_still_in_flight() {
        let tmp = TempDir::new().unwrap();
        let keys = Arc::new(StubKeys::new());
        let (recorder, mut consumer) = recorder(&tmp, keys.clone(), Duration::from_secs(3600));

        recorder.start().await.unwrap();
        keys.press("last words");
        // Stop races the recv arm; either way the text must reach the chunk
        // written by the final flush.
        recorder.stop().await.unwrap();

        let artifact = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        let written = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(written.contains("last words"));
        assert_eq!(recorder.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_paused_recorder_discards_fragments() {
        let tmp = TempDir::new().unwrap();
        let keys = Arc::new(StubKeys::new());
        let (recorder, consumer) = recorder(&tmp, keys.clone(), Duration::from_secs(3600));

        recorder.start().await.unwrap();
        recorder.control().pause();
        keys.press("secret");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(recorder.buffered_len(), 0);
        recorder.control().resume();
        keys.press("ok");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.buffered_len(), 2);

        recorder.stop().await.unwrap();
        // Final flush on stop captures the post-resume text.
        assert_eq!(consumer.len(), 1);
    }
}
