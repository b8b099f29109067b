use crate::capture::{
    ActiveWindowProbe, AudioSource, CommandAudioSource, CommandScreenSource, CommandWindowProbe,
    CrosstermKeySource, KeySource, ScreenSource,
};
use crate::config::GuardianConfig;
use std::sync::Arc;

/// Why the daemon is shutting down.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

/// Platform capture backends handed to the orchestrator. Production wiring
/// uses the command-based sources from the configuration; tests substitute
/// stubs.
#[derive(Clone)]
pub struct CaptureSources {
    pub audio: Arc<dyn AudioSource>,
    pub screen: Arc<dyn ScreenSource>,
    pub window_probe: Arc<dyn ActiveWindowProbe>,
    pub keys: Arc<dyn KeySource>,
}

impl CaptureSources {
    pub fn from_config(config: &GuardianConfig) -> Self {
        Self {
            audio: Arc::new(CommandAudioSource::new(config.audio.capture_command.clone())),
            screen: Arc::new(CommandScreenSource::new(config.screen.capture_command.clone())),
            window_probe: Arc::new(CommandWindowProbe::new(
                config.screen.active_window_command.clone(),
            )),
            keys: Arc::new(CrosstermKeySource),
        }
    }
}
