pub mod analysis;
pub mod app;
pub mod artifact;
pub mod capture;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod power;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod summary;

pub use analysis::{AnalysisService, AnalysisWorker, OpenRouterClient};
pub use app::{CaptureSources, GuardianOrchestrator, ShutdownReason, SystemStatus};
pub use artifact::{CaptureArtifact, StreamKind};
pub use capture::{
    AudioRecorder, AudioSource, KeyboardRecorder, KeySource, ScreenCapturer, ScreenSource,
};
pub use config::GuardianConfig;
pub use error::{GuardianError, Result};
pub use lifecycle::LifecycleState;
pub use power::{PowerEvent, PowerMonitor, PowerSignalSource};
pub use queue::{artifact_queue, ArtifactConsumer, ArtifactQueue};
pub use scheduler::{TaskScheduler, TriggerName};
pub use storage::{CleanupResult, DataLayout};
pub use summary::SummaryGenerator;
