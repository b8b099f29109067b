use crate::analysis::AnalysisService;
use crate::artifact::StreamKind;
use crate::error::Result;
use crate::storage::DataLayout;
use std::sync::Arc;
use tracing::{debug, info};

/// End-of-day report generation.
///
/// Feeds the day's three analysis aggregates to the chat model and writes
/// the result as `summary.md` under the day's summaries directory. A day
/// with no captured data produces no summary file.
pub struct SummaryGenerator {
    service: Arc<dyn AnalysisService>,
    layout: DataLayout,
    prompt: String,
}

impl SummaryGenerator {
    pub fn new(service: Arc<dyn AnalysisService>, layout: DataLayout, prompt: String) -> Self {
        Self {
            service,
            layout,
            prompt,
        }
    }

    fn section_title(stream: StreamKind) -> &'static str {
        match stream {
            StreamKind::Audio => "Audio transcript",
            StreamKind::Screen => "Screen activity",
            StreamKind::Keyboard => "Keyboard activity",
        }
    }

    /// Concatenate the day's aggregates into the model input. Returns `None`
    /// when every aggregate is missing or empty.
    fn collect_day(&self, day: &str) -> Option<String> {
        let mut sections = Vec::new();
        for stream in StreamKind::ALL {
            let path = self.layout.aggregate_file(stream, day);
            match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    sections.push(format!("## {}\n{}", Self::section_title(stream), content.trim()));
                }
                Ok(_) => {}
                Err(_) => debug!(path = %path.display(), "No aggregate for stream"),
            }
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Generate and persist the summary for one day (YYYY-MM-DD). Returns
    /// the written path, or `None` if the day has no data.
    pub async fn generate(&self, day: &str) -> Result<Option<std::path::PathBuf>> {
        let Some(content) = self.collect_day(day) else {
            info!(day, "No activity data, skipping summary");
            return Ok(None);
        };

        info!(day, bytes = content.len(), "Generating daily summary");
        let summary = self.service.complete(&self.prompt, &content).await?;

        let path = self.layout.summary_file(day);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let generated_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let report = format!(
            "# Daily summary for {day}\n\nGenerated at {generated_at}\n\n{summary}\n"
        );
        std::fs::write(&path, report)?;

        info!(path = %path.display(), "Daily summary written");
        Ok(Some(path))
    }
}
