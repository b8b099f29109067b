use crate::artifact::{CaptureArtifact, StreamKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Create the producer and consumer halves of a stream's artifact queue.
///
/// Unbounded, strict FIFO, single consumer. Producers never block on enqueue;
/// memory growth under analysis backpressure is a deliberate trade for capture
/// continuity.
pub fn artifact_queue(stream: StreamKind) -> (ArtifactQueue, ArtifactConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        ArtifactQueue {
            stream,
            tx,
            depth: Arc::clone(&depth),
        },
        ArtifactConsumer { stream, rx, depth },
    )
}

/// Enqueue handle held by a producer.
#[derive(Clone)]
pub struct ArtifactQueue {
    stream: StreamKind,
    tx: mpsc::UnboundedSender<CaptureArtifact>,
    depth: Arc<AtomicUsize>,
}

impl ArtifactQueue {
    /// Never blocks and never fails (bounded only by available memory).
    pub fn enqueue(&self, artifact: CaptureArtifact) {
        if self.tx.send(artifact).is_ok() {
            let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(stream = %self.stream, depth, "Artifact enqueued");
            if depth > 100 && depth % 100 == 0 {
                warn!(stream = %self.stream, depth, "Analysis queue is growing");
            }
        } else {
            // Consumer gone; only reachable during shutdown.
            warn!(stream = %self.stream, "Artifact dropped, queue consumer is gone");
        }
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dequeue handle owned by exactly one worker.
pub struct ArtifactConsumer {
    stream: StreamKind,
    rx: mpsc::UnboundedReceiver<CaptureArtifact>,
    depth: Arc<AtomicUsize>,
}

impl ArtifactConsumer {
    /// Block up to `timeout` for the next artifact. Returns `None` on timeout
    /// so the worker loop can re-check its running flag without busy-spinning.
    pub async fn dequeue(&mut self, timeout: Duration) -> Option<CaptureArtifact> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(artifact)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Some(artifact)
            }
            Ok(None) => {
                // All producer handles dropped; wait out the timeout so the
                // caller's loop keeps its polling rhythm.
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Return everything currently buffered without blocking.
    pub fn drain(&mut self) -> Vec<CaptureArtifact> {
        let mut items = Vec::new();
        while let Ok(artifact) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            items.push(artifact);
        }
        items
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn artifact(tag: &str) -> CaptureArtifact {
        CaptureArtifact::new(
            StreamKind::Audio,
            format!("/tmp/{tag}.wav").into(),
            Local::now(),
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut consumer) = artifact_queue(StreamKind::Audio);
        for i in 0..5 {
            queue.enqueue(artifact(&format!("chunk_{i}")));
        }
        assert_eq!(queue.len(), 5);

        for i in 0..5 {
            let item = consumer.dequeue(Duration::from_millis(100)).await.unwrap();
            assert!(item.path.to_string_lossy().contains(&format!("chunk_{i}")));
        }
        assert!(consumer.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let (_queue, mut consumer) = artifact_queue(StreamKind::Screen);
        let start = std::time::Instant::now();
        let item = consumer.dequeue(Duration::from_millis(50)).await;
        assert!(item.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_drain_returns_buffered_items() {
        let (queue, mut consumer) = artifact_queue(StreamKind::Keyboard);
        queue.enqueue(artifact("a"));
        queue.enqueue(artifact("b"));

        let items = consumer.drain();
        assert_eq!(items.len(), 2);
        assert!(consumer.drain().is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_consumer_dropped_does_not_panic() {
        let (queue, consumer) = artifact_queue(StreamKind::Audio);
        drop(consumer);
        queue.enqueue(artifact("late"));
    }
}
