use super::{GuardianOrchestrator, ShutdownReason};
use crate::error::{GuardianError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

impl GuardianOrchestrator {
    /// Block until a shutdown signal arrives, then stop everything. Returns
    /// the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Guardian is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| GuardianError::system("Shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| GuardianError::system("Shutdown receiver already taken"))?;

        Self::setup_signal_handlers(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| GuardianError::system("Shutdown channel closed unexpectedly"))?;
        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;
        info!("Guardian shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
