use crate::error::{GuardianError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Component lifecycle states.
///
/// Valid transitions: Stopped -> Starting -> Running, Running <-> Paused,
/// Running | Paused -> Stopping -> Stopped. A component that misses its stop
/// deadline is marked Failed and abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Starting, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Failed, Starting)
        )
    }
}

/// Shared lifecycle state for one component.
#[derive(Clone)]
pub struct StateCell {
    inner: Arc<Mutex<LifecycleState>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LifecycleState::Stopped)),
        }
    }

    pub fn get(&self) -> LifecycleState {
        *self.inner.lock()
    }

    /// Apply a transition, rejecting anything outside the state machine.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.can_transition_to(next) {
            return Err(GuardianError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    /// Set the state unconditionally. Reserved for abandonment paths where
    /// the component is already outside the normal state machine.
    pub fn force(&self, next: LifecycleState) {
        *self.inner.lock() = next;
    }

    /// Transition only if currently in `from`; returns whether it applied.
    pub fn transition_from(&self, from: LifecycleState, next: LifecycleState) -> bool {
        let mut state = self.inner.lock();
        if *state == from && state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
