use super::GuardianOrchestrator;
use crate::lifecycle::LifecycleState;
use std::collections::HashMap;

/// Point-in-time view of every component's lifecycle state.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub system: LifecycleState,
    pub components: HashMap<&'static str, LifecycleState>,
}

impl GuardianOrchestrator {
    pub fn system_state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn status(&self) -> SystemStatus {
        let mut components = HashMap::new();
        if let Some(audio) = &self.audio {
            components.insert("audio_recorder", audio.control().state());
        }
        if let Some(screen) = &self.screen {
            components.insert("screen_capturer", screen.control().state());
        }
        if let Some(keyboard) = &self.keyboard {
            components.insert("keyboard_recorder", keyboard.control().state());
        }
        for worker in &self.workers {
            let name = match worker.stream() {
                crate::artifact::StreamKind::Audio => "audio_worker",
                crate::artifact::StreamKind::Screen => "screen_worker",
                crate::artifact::StreamKind::Keyboard => "keyboard_worker",
            };
            components.insert(name, worker.state());
        }
        components.insert("power_monitor", self.power_monitor.state());
        components.insert("scheduler", self.scheduler.state());

        SystemStatus {
            system: self.state.get(),
            components,
        }
    }
}
