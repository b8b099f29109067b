use crate::lifecycle::LifecycleState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Power monitor error: {0}")]
    PowerMonitor(#[from] PowerMonitorError),

    #[error("Component '{component}' did not stop within {timeout_secs}s")]
    LifecycleTimeout {
        component: &'static str,
        timeout_secs: u64,
    },

    #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl GuardianError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures during artifact creation. Logged by the producer loop, which then
/// continues to the next cadence tick.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("Capture command for {stream} exited with {status}: {stderr}")]
    CommandFailed {
        stream: &'static str,
        status: String,
        stderr: String,
    },

    #[error("Failed to spawn capture command for {stream}: {source}")]
    CommandSpawn {
        stream: &'static str,
        source: std::io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("Key listener error: {message}")]
    KeyListener { message: String },
}

/// Failures from the external analysis service for a single artifact. The
/// worker logs these and drops the item; they never stop the worker loop.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Request to analysis service failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Analysis service returned status {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Malformed response from analysis service: {message}")]
    MalformedResponse { message: String },

    #[error("Artifact not found: {path}")]
    MissingArtifact { path: String },

    #[error("IO error reading artifact {path}: {source}")]
    ArtifactRead {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No callback registered for trigger '{name}'")]
    UnregisteredTrigger { name: &'static str },

    #[error("Invalid time of day '{value}' (expected HH:MM)")]
    InvalidTimeOfDay { value: String },

    #[error("Unknown timezone '{value}'")]
    InvalidTimezone { value: String },
}

#[derive(Error, Debug)]
pub enum PowerMonitorError {
    #[error("Failed to bind power event source: {message}")]
    Bind { message: String },
}

pub type Result<T> = std::result::Result<T, GuardianError>;
