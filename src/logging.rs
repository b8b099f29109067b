use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use std::path::Path;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "guardian.log";

/// Initialize the tracing subscriber: console output plus a daily-rolling file
/// under `log_dir`. The returned guard must be held for the process lifetime
/// or buffered log lines are lost.
pub fn init(level: &str, log_dir: &Path) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("guardian={level}")));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).boxed();
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Remove rolled log files older than the retention window. File names follow
/// the appender's `guardian.log.YYYY-MM-DD` convention.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let cutoff = Local::now().date_naive() - ChronoDuration::days(retention_days as i64);
    let mut removed = 0;

    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(&format!("{LOG_FILE_PREFIX}.")) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(suffix, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %entry.path().display(), "Removed expired log file");
                    removed += 1;
                }
                Err(e) => warn!(file = %entry.path().display(), "Failed to remove log file: {e}"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_only_expired_logs() {
        let tmp = TempDir::new().unwrap();
        let old_day = (Local::now().date_naive() - ChronoDuration::days(30))
            .format("%Y-%m-%d")
            .to_string();
        let recent_day = Local::now().date_naive().format("%Y-%m-%d").to_string();

        let old = tmp.path().join(format!("{LOG_FILE_PREFIX}.{old_day}"));
        let recent = tmp.path().join(format!("{LOG_FILE_PREFIX}.{recent_day}"));
        let other = tmp.path().join("unrelated.txt");
        for f in [&old, &recent, &other] {
            std::fs::write(f, "x").unwrap();
        }

        let removed = cleanup_old_logs(tmp.path(), 7);
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        assert_eq!(cleanup_old_logs(Path::new("/nonexistent/logs"), 7), 0);
    }
}
