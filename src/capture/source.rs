use crate::error::CaptureError;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Records one audio chunk of the given duration into `dest`.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn record(&self, dest: &Path, duration: Duration) -> Result<(), CaptureError>;
}

/// Grabs one screenshot into `dest`.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn grab(&self, dest: &Path) -> Result<(), CaptureError>;
}

/// Reports the currently focused window title, used for the privacy
/// deny-list check before each screen capture.
#[async_trait]
pub trait ActiveWindowProbe: Send + Sync {
    async fn active_window_title(&self) -> Option<String>;
}

/// Delivers keystroke text fragments into `sink` until `cancel` fires.
pub trait KeySource: Send + Sync {
    fn listen(
        &self,
        sink: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Result<(), CaptureError>;
}

async fn run_capture_command(
    stream: &'static str,
    command: &str,
) -> Result<(), CaptureError> {
    debug!(stream, command, "Running capture command");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CaptureError::CommandSpawn { stream, source: e })?;

    if !output.status.success() {
        return Err(CaptureError::CommandFailed {
            stream,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Audio capture via an external recorder command with `{path}` and
/// `{duration}` placeholders.
pub struct CommandAudioSource {
    command: String,
}

impl CommandAudioSource {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AudioSource for CommandAudioSource {
    async fn record(&self, dest: &Path, duration: Duration) -> Result<(), CaptureError> {
        let rendered = self
            .command
            .replace("{path}", &dest.to_string_lossy())
            .replace("{duration}", &duration.as_secs().to_string());
        run_capture_command("audio", &rendered).await
    }
}

/// Screenshot capture via an external command with a `{path}` placeholder.
pub struct CommandScreenSource {
    command: String,
}

impl CommandScreenSource {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ScreenSource for CommandScreenSource {
    async fn grab(&self, dest: &Path) -> Result<(), CaptureError> {
        let rendered = self.command.replace("{path}", &dest.to_string_lossy());
        run_capture_command("screen", &rendered).await
    }
}

/// Active-window lookup via an external command printing the title on stdout.
/// An empty command disables the probe (no title, nothing is denied).
pub struct CommandWindowProbe {
    command: String,
}

impl CommandWindowProbe {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ActiveWindowProbe for CommandWindowProbe {
    async fn active_window_title(&self) -> Option<String> {
        if self.command.trim().is_empty() {
            return None;
        }
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!title.is_empty()).then_some(title)
    }
}

/// Terminal key source: polls crossterm in a blocking task and forwards each
/// key press as a text fragment.
pub struct CrosstermKeySource;

impl CrosstermKeySource {
    fn fragment_for(code: KeyCode) -> Option<String> {
        match code {
            KeyCode::Char(c) => Some(c.to_string()),
            KeyCode::Enter => Some("\n".to_string()),
            KeyCode::Tab => Some("\t".to_string()),
            KeyCode::Backspace => Some("[BKSP]".to_string()),
            KeyCode::Esc => Some("[ESC]".to_string()),
            KeyCode::Delete => Some("[DEL]".to_string()),
            KeyCode::F(n) => Some(format!("[F{n}]")),
            _ => None,
        }
    }
}

impl KeySource for CrosstermKeySource {
    fn listen(
        &self,
        sink: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Result<(), CaptureError> {
        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for key capture: {}", e);
                return;
            }

            loop {
                if cancel.is_cancelled() {
                    debug!("Key source stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if key_event.kind != KeyEventKind::Press {
                                continue;
                            }
                            if let Some(fragment) = Self::fragment_for(key_event.code) {
                                if sink.send(fragment).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Error polling for key events: {}", e),
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
        });

        Ok(())
    }
}
