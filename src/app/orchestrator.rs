use super::types::{CaptureSources, ShutdownReason};
use crate::analysis::{AnalysisService, AnalysisWorker, OpenRouterClient};
use crate::artifact::StreamKind;
use crate::capture::{AudioRecorder, KeyboardRecorder, PrivacyFilter, ScreenCapturer};
use crate::config::GuardianConfig;
use crate::error::Result;
use crate::lifecycle::StateCell;
use crate::power::{PowerMonitor, PowerSignalSource, UnixSignalSource};
use crate::queue::artifact_queue;
use crate::scheduler::TaskScheduler;
use crate::storage::DataLayout;
use crate::summary::SummaryGenerator;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Main coordinator owning every pipeline component.
///
/// Construction wires producers, queues, and workers per the configuration;
/// disabled streams get no producer and no worker. All external effects come
/// in through injected backends so the whole pipeline runs against stubs in
/// tests.
pub struct GuardianOrchestrator {
    pub(super) config: GuardianConfig,
    pub(super) layout: DataLayout,
    pub(super) tz: Tz,

    // Producers, present only for enabled streams
    pub(super) audio: Option<Arc<AudioRecorder>>,
    pub(super) screen: Option<Arc<ScreenCapturer>>,
    pub(super) keyboard: Option<Arc<KeyboardRecorder>>,

    pub(super) workers: Vec<Arc<AnalysisWorker>>,
    pub(super) power_monitor: Arc<PowerMonitor>,
    pub(super) scheduler: Arc<TaskScheduler>,
    pub(super) summary: Arc<SummaryGenerator>,

    // Lifecycle management
    pub(super) state: StateCell,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl GuardianOrchestrator {
    /// Wire the full pipeline from injected backends.
    pub fn new(
        config: GuardianConfig,
        sources: CaptureSources,
        service: Arc<dyn AnalysisService>,
        power_source: Arc<dyn PowerSignalSource>,
    ) -> Result<Self> {
        let layout = DataLayout::new(config.system.data_dir.clone());
        let tz: Tz = config
            .schedule
            .timezone
            .parse()
            .map_err(|_| crate::error::SchedulerError::InvalidTimezone {
                value: config.schedule.timezone.clone(),
            })?;
        let scheduler = Arc::new(TaskScheduler::new(
            &config.schedule.timezone,
            Duration::from_secs(config.schedule.poll_interval_seconds),
        )?);

        let mut workers = Vec::new();

        let audio = if config.audio.enabled {
            let (queue, consumer) = artifact_queue(StreamKind::Audio);
            workers.push(Arc::new(AnalysisWorker::new(
                StreamKind::Audio,
                Arc::clone(&service),
                layout.clone(),
                consumer,
                String::new(),
                config.audio.retain_artifacts,
            )));
            Some(Arc::new(AudioRecorder::new(
                Arc::clone(&sources.audio),
                layout.clone(),
                queue,
                Duration::from_secs(config.audio.chunk_duration_minutes * 60),
                config.audio.file_extension.clone(),
            )))
        } else {
            None
        };

        let screen = if config.screen.enabled {
            let (queue, consumer) = artifact_queue(StreamKind::Screen);
            workers.push(Arc::new(AnalysisWorker::new(
                StreamKind::Screen,
                Arc::clone(&service),
                layout.clone(),
                consumer,
                config.analysis.screen_prompt.clone(),
                config.screen.retain_artifacts,
            )));
            Some(Arc::new(ScreenCapturer::new(
                Arc::clone(&sources.screen),
                Arc::clone(&sources.window_probe),
                PrivacyFilter::new(&config.privacy.excluded_apps, &config.privacy.excluded_windows),
                layout.clone(),
                queue,
                Duration::from_secs(config.screen.capture_interval_seconds),
                config.screen.format.clone(),
            )))
        } else {
            None
        };

        let keyboard = if config.keyboard.enabled {
            let (queue, consumer) = artifact_queue(StreamKind::Keyboard);
            workers.push(Arc::new(AnalysisWorker::new(
                StreamKind::Keyboard,
                Arc::clone(&service),
                layout.clone(),
                consumer,
                config.analysis.keyboard_prompt.clone(),
                // Raw keystroke files never outlive their analysis.
                false,
            )));
            Some(Arc::new(KeyboardRecorder::new(
                Arc::clone(&sources.keys),
                layout.clone(),
                queue,
                Duration::from_secs(config.keyboard.flush_interval_minutes * 60),
            )))
        } else {
            None
        };

        let summary = Arc::new(SummaryGenerator::new(
            Arc::clone(&service),
            layout.clone(),
            config.analysis.summary_prompt.clone(),
        ));

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            layout,
            tz,
            audio,
            screen,
            keyboard,
            workers,
            power_monitor: Arc::new(PowerMonitor::new(power_source)),
            scheduler,
            summary,
            state: StateCell::new(),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    /// Production wiring: command-based capture, OpenRouter analysis, Unix
    /// signal power events.
    pub fn from_config(config: GuardianConfig) -> Result<Self> {
        let sources = CaptureSources::from_config(&config);
        let service: Arc<dyn AnalysisService> =
            Arc::new(OpenRouterClient::new(&config.analysis).map_err(crate::error::GuardianError::Analysis)?);
        Self::new(config, sources, service, Arc::new(UnixSignalSource))
    }
}
