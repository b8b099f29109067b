use crate::artifact::StreamKind;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the directory holding daily summary reports, alongside the three
/// stream directories.
const SUMMARIES_DIR: &str = "summaries";

/// On-disk layout produced by the pipeline:
/// `data/<stream>/<YYYY-MM-DD>/<artifact-or-aggregate-file>`.
///
/// Aggregate files are plain append-only text with a timestamp header per
/// entry; downstream summary generation reads them verbatim.
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
}

/// Today's date partition key (YYYY-MM-DD).
pub fn today_key() -> String {
    day_key(Local::now())
}

pub fn day_key(when: DateTime<Local>) -> String {
    when.format("%Y-%m-%d").to_string()
}

impl DataLayout {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn stream_dir(&self, stream: StreamKind, day: &str) -> PathBuf {
        self.data_dir.join(stream.as_str()).join(day)
    }

    pub fn summary_dir(&self, day: &str) -> PathBuf {
        self.data_dir.join(SUMMARIES_DIR).join(day)
    }

    /// Per-day append-only analysis aggregate for a stream.
    pub fn aggregate_file(&self, stream: StreamKind, day: &str) -> PathBuf {
        self.stream_dir(stream, day).join(stream.aggregate_file_name())
    }

    pub fn summary_file(&self, day: &str) -> PathBuf {
        self.summary_dir(day).join("summary.md")
    }

    /// Create a stream's day directory if missing and return its path.
    pub fn ensure_stream_dir(&self, stream: StreamKind, day: &str) -> std::io::Result<PathBuf> {
        let dir = self.stream_dir(stream, day);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Append one timestamped entry to an aggregate file, creating parents as
    /// needed. Entry format: `\n[<label>]\n<text>\n`.
    pub fn append_entry(&self, file: &Path, label: &str, text: &str) -> std::io::Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(file)?;
        write!(f, "\n[{label}]\n{text}\n")?;
        debug!(file = %file.display(), "Aggregate entry appended");
        Ok(())
    }

    /// Remove day directories older than the retention window across all
    /// stream directories and the summaries directory.
    pub fn cleanup_older_than(&self, retention_days: u32, today: NaiveDate) -> Result<CleanupResult> {
        let cutoff = today - ChronoDuration::days(retention_days as i64);
        let mut result = CleanupResult::default();

        let mut roots: Vec<PathBuf> = StreamKind::ALL
            .iter()
            .map(|s| self.data_dir.join(s.as_str()))
            .collect();
        roots.push(self.data_dir.join(SUMMARIES_DIR));

        for root in roots {
            if !root.exists() {
                continue;
            }
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                    // Not a day partition; leave it alone.
                    continue;
                };
                if date < cutoff {
                    match std::fs::remove_dir_all(entry.path()) {
                        Ok(()) => {
                            debug!(dir = %entry.path().display(), "Removed expired day directory");
                            result.removed_dirs += 1;
                        }
                        Err(e) => {
                            warn!(dir = %entry.path().display(), "Failed to remove expired directory: {e}");
                            result.errors += 1;
                        }
                    }
                } else {
                    result.retained_dirs += 1;
                }
            }
        }

        info!(
            removed = result.removed_dirs,
            retained = result.retained_dirs,
            retention_days,
            "Data cleanup completed"
        );
        Ok(result)
    }
}

/// Outcome of a retention cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub removed_dirs: usize,
    pub retained_dirs: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.aggregate_file(StreamKind::Audio, "2026-01-05"),
            PathBuf::from("/data/audio/2026-01-05/transcript.txt")
        );
        assert_eq!(
            layout.summary_file("2026-01-05"),
            PathBuf::from("/data/summaries/2026-01-05/summary.md")
        );
    }

    #[test]
    fn test_append_entry_format() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        let file = layout.aggregate_file(StreamKind::Screen, "2026-01-05");

        layout.append_entry(&file, "09:15:00", "Editor open").unwrap();
        layout.append_entry(&file, "09:15:30", "Browser open").unwrap();

        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(
            content,
            "\n[09:15:00]\nEditor open\n\n[09:15:30]\nBrowser open\n"
        );
    }

    #[test]
    fn test_cleanup_removes_only_expired_day_dirs() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());

        for day in ["2026-01-01", "2026-01-09", "2026-01-10"] {
            layout.ensure_stream_dir(StreamKind::Audio, day).unwrap();
        }
        std::fs::create_dir_all(tmp.path().join("audio/not-a-date")).unwrap();
        std::fs::create_dir_all(layout.summary_dir("2026-01-01")).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let result = layout.cleanup_older_than(7, today).unwrap();

        assert_eq!(result.removed_dirs, 2); // audio + summaries for 2026-01-01
        assert!(!layout.stream_dir(StreamKind::Audio, "2026-01-01").exists());
        assert!(layout.stream_dir(StreamKind::Audio, "2026-01-09").exists());
        assert!(tmp.path().join("audio/not-a-date").exists());
        assert_eq!(result.errors, 0);
    }
}
