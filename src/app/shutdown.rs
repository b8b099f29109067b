use super::GuardianOrchestrator;
use crate::error::Result;
use crate::lifecycle::LifecycleState;
use tracing::{error, info};

impl GuardianOrchestrator {
    /// Graceful shutdown in reverse start order: scheduler and power monitor
    /// first so no new triggers or pause events arrive, then producers so no
    /// new artifacts arrive, then workers drain their queues. Errors from one
    /// component never prevent stopping the rest; any error turns the exit
    /// code nonzero.
    pub async fn shutdown(&self) -> Result<i32> {
        let current = self.state.get();
        if matches!(current, LifecycleState::Stopped | LifecycleState::Stopping) {
            return Ok(0);
        }
        self.state.transition(LifecycleState::Stopping)?;
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        if let Err(e) = self.scheduler.stop().await {
            error!("Error stopping scheduler: {}", e);
            exit_code = 1;
        }
        if let Err(e) = self.power_monitor.stop().await {
            error!("Error stopping power monitor: {}", e);
            exit_code = 1;
        }

        if let Some(audio) = &self.audio {
            if let Err(e) = audio.stop().await {
                error!("Error stopping audio recorder: {}", e);
                exit_code = 1;
            }
        }
        if let Some(screen) = &self.screen {
            if let Err(e) = screen.stop().await {
                error!("Error stopping screen capturer: {}", e);
                exit_code = 1;
            }
        }
        if let Some(keyboard) = &self.keyboard {
            if let Err(e) = keyboard.stop().await {
                error!("Error stopping keyboard recorder: {}", e);
                exit_code = 1;
            }
        }

        // Workers keep consuming until their queues are empty.
        for worker in &self.workers {
            if let Err(e) = worker.stop().await {
                error!("Error stopping {} worker: {}", worker.stream(), e);
                exit_code = 1;
            }
        }

        self.state.transition(LifecycleState::Stopped)?;
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
