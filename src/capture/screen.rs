use crate::artifact::{CaptureArtifact, StreamKind};
use crate::capture::source::{ActiveWindowProbe, ScreenSource};
use crate::capture::ProducerControl;
use crate::error::Result;
use crate::queue::ArtifactQueue;
use crate::storage::{self, DataLayout};
use chrono::Local;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Case-insensitive substring deny-list applied to the active window title
/// before each screenshot.
#[derive(Debug, Clone, Default)]
pub struct PrivacyFilter {
    terms: Vec<String>,
}

impl PrivacyFilter {
    pub fn new(excluded_apps: &[String], excluded_windows: &[String]) -> Self {
        let terms = excluded_apps
            .iter()
            .chain(excluded_windows.iter())
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    pub fn denies(&self, window_title: &str) -> bool {
        let title = window_title.to_lowercase();
        self.terms.iter().any(|t| title.contains(t.as_str()))
    }
}

/// Periodic screenshot capture on a fixed interval.
///
/// Each tick checks the pause flag and the privacy filter; a denied or
/// paused tick is skipped entirely, no file is written.
pub struct ScreenCapturer {
    control: ProducerControl,
    source: Arc<dyn ScreenSource>,
    probe: Arc<dyn ActiveWindowProbe>,
    filter: PrivacyFilter,
    layout: DataLayout,
    queue: ArtifactQueue,
    interval: Duration,
    format: String,
}

impl ScreenCapturer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn ScreenSource>,
        probe: Arc<dyn ActiveWindowProbe>,
        filter: PrivacyFilter,
        layout: DataLayout,
        queue: ArtifactQueue,
        interval: Duration,
        format: String,
    ) -> Self {
        Self {
            control: ProducerControl::new("screen_capturer"),
            source,
            probe,
            filter,
            layout,
            queue,
            interval,
            format,
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
            interval_secs = self.interval.as_secs(),
            "Starting screen capturer"
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
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(title) = self.probe.active_window_title().await {
                        if self.filter.denies(&title) {
                            debug!("Active window is on the deny list, skipping screenshot");
                            continue;
                        }
                    }
                    if let Err(e) = self.capture_frame().await {
                        error!("Screenshot capture failed: {}", e);
                    }
                }
            }
        }
        debug!("Screen capturer loop exited");
    }

    async fn capture_frame(&self) -> Result<()> {
        let taken = Local::now();
        let day = storage::day_key(taken);
        let dir = self.layout.ensure_stream_dir(StreamKind::Screen, &day)?;
        let path = dir.join(format!(
            "screen_{}.{}",
            taken.format("%Y%m%d_%H%M%S"),
            self.format
        ));

        self.source.grab(&path).await?;

        debug!(path = %path.display(), "Screenshot captured");
        self.queue
            .enqueue(CaptureArtifact::new(StreamKind::Screen, path, taken));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::queue::artifact_queue;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use tempfile::TempDir;

    struct StubScreen;

    #[async_trait]
    impl ScreenSource for StubScreen {
        async fn grab(&self, dest: &Path) -> std::result::Result<(), CaptureError> {
            std::fs::write(dest, b"\xff\xd8").unwrap();
            Ok(())
        }
    }

    struct StubProbe {
        title: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ActiveWindowProbe for StubProbe {
        async fn active_window_title(&self) -> Option<String> {
            self.title.lock().clone()
        }
    }

    fn capturer(
        tmp: &TempDir,
        probe: Arc<StubProbe>,
        filter: PrivacyFilter,
    ) -> (Arc<ScreenCapturer>, crate::queue::ArtifactConsumer) {
        let (queue, consumer) = artifact_queue(StreamKind::Screen);
        let capturer = Arc::new(ScreenCapturer::new(
            Arc::new(StubScreen),
            probe,
            filter,
            DataLayout::new(tmp.path()),
            queue,
            Duration::from_millis(10),
            "jpg".to_string(),
        ));
        (capturer, consumer)
    }

    #[test]
    fn test_privacy_filter_matches_case_insensitive_substring() {
        let filter = PrivacyFilter::new(
            &["KeePass".to_string()],
            &["banking".to_string(), String::new()],
        );
        assert!(filter.denies("keepass 2.57"));
        assert!(filter.denies("My Banking Portal - Firefox"));
        assert!(!filter.denies("Text Editor"));
        assert!(!PrivacyFilter::default().denies("anything"));
    }

    #[tokio::test]
    async fn test_screenshots_are_captured_and_enqueued() {
        let tmp = TempDir::new().unwrap();
        let probe = Arc::new(StubProbe {
            title: Mutex::new(Some("Editor".to_string())),
        });
        let (capturer, mut consumer) = capturer(&tmp, probe, PrivacyFilter::default());

        capturer.start().await.unwrap();
        let artifact = consumer.dequeue(Duration::from_secs(5)).await.unwrap();
        capturer.stop().await.unwrap();

        assert_eq!(artifact.stream, StreamKind::Screen);
        assert!(artifact.path.exists());
        assert!(artifact
            .path
            .to_string_lossy()
            .contains(&format!("screen/{}", artifact.day_key)));
    }

    #[tokio::test]
    async fn test_denied_window_is_never_written() {
        let tmp = TempDir::new().unwrap();
        let probe = Arc::new(StubProbe {
            title: Mutex::new(Some("Banking Portal".to_string())),
        });
        let filter = PrivacyFilter::new(&[], &["banking".to_string()]);
        let (capturer, consumer) = capturer(&tmp, probe, filter);

        capturer.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        capturer.stop().await.unwrap();

        assert!(consumer.is_empty());
        assert!(!tmp.path().join("screen").exists());
    }
}
