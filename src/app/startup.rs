use super::GuardianOrchestrator;
use crate::capture::{AudioRecorder, KeyboardRecorder, ScreenCapturer};
use crate::error::Result;
use crate::lifecycle::LifecycleState;
use crate::power::PowerEvent;
use crate::scheduler::{run_logged, TriggerName};
use crate::storage::DataLayout;
use chrono::Utc;
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Pause-resume closures need the producer set by value; Option clones of
/// the Arcs keep this cheap.
#[derive(Clone)]
struct ProducerSet {
    audio: Option<Arc<AudioRecorder>>,
    screen: Option<Arc<ScreenCapturer>>,
    keyboard: Option<Arc<KeyboardRecorder>>,
}

impl ProducerSet {
    fn pause_all(&self) {
        if let Some(audio) = &self.audio {
            audio.control().pause();
        }
        if let Some(screen) = &self.screen {
            screen.control().pause();
        }
        if let Some(keyboard) = &self.keyboard {
            keyboard.control().pause();
        }
    }

    fn resume_all(&self) {
        if let Some(audio) = &self.audio {
            audio.control().resume();
        }
        if let Some(screen) = &self.screen {
            screen.control().resume();
        }
        if let Some(keyboard) = &self.keyboard {
            keyboard.control().resume();
        }
    }
}

impl GuardianOrchestrator {
    /// Register power listeners and scheduled jobs. Must run before start.
    pub fn initialize(&self) -> Result<()> {
        info!("Initializing Guardian components");
        self.register_power_listeners();
        self.register_scheduled_tasks()?;
        info!("All components initialized");
        Ok(())
    }

    fn register_power_listeners(&self) {
        let producers = ProducerSet {
            audio: self.audio.clone(),
            screen: self.screen.clone(),
            keyboard: self.keyboard.clone(),
        };

        {
            let producers = producers.clone();
            self.power_monitor.register(PowerEvent::Sleep, move || {
                info!("System going to sleep, pausing capture");
                producers.pause_all();
            });
        }
        {
            let producers = producers.clone();
            self.power_monitor.register(PowerEvent::Wake, move || {
                info!("System woke up, resuming capture");
                producers.resume_all();
            });
        }

        if self.config.privacy.pause_on_lock {
            {
                let producers = producers.clone();
                self.power_monitor.register(PowerEvent::Lock, move || {
                    info!("Session locked, pausing capture");
                    producers.pause_all();
                });
            }
            self.power_monitor.register(PowerEvent::Unlock, move || {
                info!("Session unlocked, resuming capture");
                producers.resume_all();
            });
        }
    }

    fn register_scheduled_tasks(&self) -> Result<()> {
        let summary = Arc::clone(&self.summary);
        let tz = self.tz;
        self.scheduler.register(
            TriggerName::DailySummary,
            &self.config.schedule.summary_time,
            move || {
                let summary = Arc::clone(&summary);
                async move {
                    let day = Utc::now().with_timezone(&tz).format("%Y-%m-%d").to_string();
                    run_logged("daily_summary", || async move {
                        summary.generate(&day).await?;
                        Ok(())
                    })
                    .await;
                }
            },
        )?;

        let layout = self.layout.clone();
        let log_dir = PathBuf::from(&self.config.system.log_dir);
        let data_retention = self.config.system.data_retention_days;
        let log_retention = self.config.system.log_retention_days;
        self.scheduler.register(
            TriggerName::Cleanup,
            &self.config.schedule.cleanup_time,
            move || {
                let layout = layout.clone();
                let log_dir = log_dir.clone();
                async move {
                    run_cleanup(&layout, &log_dir, data_retention, log_retention, tz).await;
                }
            },
        )?;
        Ok(())
    }

    /// Start every enabled component. Idempotent; a second start while
    /// running is a logged no-op.
    pub async fn start(&self) -> Result<()> {
        if matches!(
            self.state.get(),
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Paused
        ) {
            info!("Guardian already running, start is a no-op");
            return Ok(());
        }
        self.state.transition(LifecycleState::Starting)?;
        info!("Starting Guardian");

        if let Err(e) = self.start_components().await {
            error!("Startup failed: {}", e);
            self.state.transition(LifecycleState::Failed)?;
            return Err(e);
        }

        self.state.transition(LifecycleState::Running)?;
        info!("Guardian started");
        Ok(())
    }

    async fn start_components(&self) -> Result<()> {
        // Workers first so capture never outpaces an absent consumer.
        for worker in &self.workers {
            worker.start().await?;
        }

        if let Some(audio) = &self.audio {
            audio.start().await?;
        }
        if let Some(screen) = &self.screen {
            screen.start().await?;
        }
        if let Some(keyboard) = &self.keyboard {
            keyboard.start().await?;
        }

        self.power_monitor.start()?;
        self.scheduler.start()?;
        Ok(())
    }

    /// Run a scheduled job immediately, outside its schedule.
    pub async fn run_trigger_now(&self, name: TriggerName) -> Result<()> {
        self.scheduler.run_now(name).await
    }

    /// One-shot summary generation for a given day, used by the CLI.
    pub async fn generate_summary_for(&self, day: &str) -> Result<Option<std::path::PathBuf>> {
        self.summary.generate(day).await
    }
}

async fn run_cleanup(
    layout: &DataLayout,
    log_dir: &std::path::Path,
    data_retention: u32,
    log_retention: u32,
    tz: Tz,
) {
    let today = Utc::now().with_timezone(&tz).date_naive();
    run_logged("cleanup", || async {
        let result = layout.cleanup_older_than(data_retention, today)?;
        info!(
            removed = result.removed_dirs,
            retained = result.retained_dirs,
            errors = result.errors,
            "Data retention cleanup finished"
        );
        let removed_logs = crate::logging::cleanup_old_logs(log_dir, log_retention);
        info!(removed = removed_logs, "Log retention cleanup finished");
        Ok(())
    })
    .await;
}
