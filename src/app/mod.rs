mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::GuardianOrchestrator;
pub use state::SystemStatus;
pub use types::{CaptureSources, ShutdownReason};
