pub mod client;
pub mod worker;

pub use client::OpenRouterClient;
pub use worker::AnalysisWorker;

use crate::error::AnalysisError;
use async_trait::async_trait;
use std::path::Path;

/// External AI backend used by the analysis workers and the summary
/// generator. One implementation talks to OpenRouter; tests substitute stubs.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Speech-to-text for one audio chunk file.
    async fn transcribe(&self, audio: &Path) -> Result<String, AnalysisError>;

    /// Vision-model description of one image file.
    async fn describe_image(&self, image: &Path, prompt: &str) -> Result<String, AnalysisError>;

    /// Chat completion over plain text with a system instruction.
    async fn complete(&self, system_prompt: &str, user_content: &str)
        -> Result<String, AnalysisError>;
}
