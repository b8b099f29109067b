use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One of the three independent capture categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Screen,
    Keyboard,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Audio, StreamKind::Screen, StreamKind::Keyboard];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Screen => "screen",
            StreamKind::Keyboard => "keyboard",
        }
    }

    /// File name of the per-day append-only analysis aggregate for this stream.
    pub fn aggregate_file_name(&self) -> &'static str {
        match self {
            StreamKind::Audio => "transcript.txt",
            StreamKind::Screen => "screen_analysis.txt",
            StreamKind::Keyboard => "keyboard_analysis.txt",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of captured data, referenced by file path.
///
/// Immutable after creation; ownership moves producer -> queue -> worker. The
/// worker deletes the file after successful analysis only for streams whose
/// retention policy marks them ephemeral.
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    pub stream: StreamKind,
    pub path: PathBuf,
    pub captured_at: DateTime<Local>,
    /// Date string (YYYY-MM-DD) used for file partitioning.
    pub day_key: String,
}

impl CaptureArtifact {
    pub fn new(stream: StreamKind, path: PathBuf, captured_at: DateTime<Local>) -> Self {
        let day_key = captured_at.format("%Y-%m-%d").to_string();
        Self {
            stream,
            path,
            captured_at,
            day_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_key_from_capture_time() {
        let when = Local.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap();
        let artifact = CaptureArtifact::new(StreamKind::Screen, "/tmp/x.jpg".into(), when);
        assert_eq!(artifact.day_key, "2026-03-14");
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(StreamKind::Audio.as_str(), "audio");
        assert_eq!(StreamKind::Keyboard.aggregate_file_name(), "keyboard_analysis.txt");
    }
}
