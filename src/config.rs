use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GuardianConfig {
    pub audio: AudioConfig,
    pub screen: ScreenConfig,
    pub keyboard: KeyboardConfig,
    pub analysis: AnalysisConfig,
    pub schedule: ScheduleConfig,
    pub privacy: PrivacyConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AudioConfig {
    /// Enable the audio capture stream
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Length of each recorded audio chunk in minutes
    #[serde(default = "default_audio_chunk_minutes")]
    pub chunk_duration_minutes: u64,

    /// Command used to record one chunk; `{path}` and `{duration}` (seconds)
    /// are substituted before execution
    #[serde(default = "default_audio_command")]
    pub capture_command: String,

    /// File extension for recorded chunks
    #[serde(default = "default_audio_extension")]
    pub file_extension: String,

    /// Keep audio chunks on disk after transcription
    #[serde(default = "default_retain_true")]
    pub retain_artifacts: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScreenConfig {
    /// Enable the screenshot capture stream
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between screenshots
    #[serde(default = "default_screen_interval")]
    pub capture_interval_seconds: u64,

    /// Command used to grab one screenshot; `{path}` is substituted
    #[serde(default = "default_screen_command")]
    pub capture_command: String,

    /// Screenshot file extension (jpg or png)
    #[serde(default = "default_screen_format")]
    pub format: String,

    /// Optional command printing the active window title, used for the
    /// privacy deny-list check; empty disables the check
    #[serde(default)]
    pub active_window_command: String,

    /// Keep screenshots on disk after analysis (ephemeral by default)
    #[serde(default)]
    pub retain_artifacts: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KeyboardConfig {
    /// Enable the keystroke capture stream
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minutes between keystroke buffer flushes
    #[serde(default = "default_keyboard_flush_minutes")]
    pub flush_interval_minutes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// API key for the analysis service
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the OpenRouter-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for audio transcription
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Model used for screenshot description
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Model used for keystroke analysis and daily summaries
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Language hint passed to transcription
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Prompt for screenshot description
    #[serde(default = "default_screen_prompt")]
    pub screen_prompt: String,

    /// Prompt for keystroke log analysis
    #[serde(default = "default_keyboard_prompt")]
    pub keyboard_prompt: String,

    /// Prompt for the daily summary
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Time of day (HH:MM) for the daily summary trigger
    #[serde(default = "default_summary_time")]
    pub summary_time: String,

    /// Time of day (HH:MM) for the daily cleanup trigger
    #[serde(default = "default_cleanup_time")]
    pub cleanup_time: String,

    /// IANA timezone used to evaluate trigger times
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Scheduler polling interval in seconds (at most 60)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PrivacyConfig {
    /// Pause capture while the session is locked
    #[serde(default = "default_enabled")]
    pub pause_on_lock: bool,

    /// Application names that suppress capture when active
    #[serde(default)]
    pub excluded_apps: Vec<String>,

    /// Window title substrings that suppress capture when active
    #[serde(default)]
    pub excluded_windows: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Root directory for captured data and aggregates
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Days to keep captured data before cleanup removes it
    #[serde(default = "default_retention_days")]
    pub data_retention_days: u32,

    /// Days to keep log files
    #[serde(default = "default_retention_days")]
    pub log_retention_days: u32,
}

impl GuardianConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("guardian.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("GUARDIAN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Missing sections fall back to their serde defaults.
        let mut map: serde_json::Map<String, serde_json::Value> =
            settings.try_deserialize::<serde_json::Map<String, serde_json::Value>>()?;
        for section in [
            "audio", "screen", "keyboard", "analysis", "schedule", "privacy", "system",
        ] {
            map.entry(section.to_string())
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
        }

        let config: GuardianConfig = serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let any_analysis = self.audio.enabled || self.screen.enabled || self.keyboard.enabled;
        if any_analysis && self.analysis.api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "analysis.api_key must be set when a capture stream is enabled".to_string(),
            ));
        }
        if self.analysis.api_key == "YOUR_API_KEY" {
            return Err(ConfigError::Message(
                "analysis.api_key still holds the placeholder value".to_string(),
            ));
        }

        if self.audio.chunk_duration_minutes == 0 {
            return Err(ConfigError::Message(
                "audio.chunk_duration_minutes must be greater than 0".to_string(),
            ));
        }
        if self.screen.capture_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "screen.capture_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.keyboard.flush_interval_minutes == 0 {
            return Err(ConfigError::Message(
                "keyboard.flush_interval_minutes must be greater than 0".to_string(),
            ));
        }

        if self.schedule.poll_interval_seconds == 0 || self.schedule.poll_interval_seconds > 60 {
            return Err(ConfigError::Message(
                "schedule.poll_interval_seconds must be in 1..=60".to_string(),
            ));
        }
        for (key, value) in [
            ("schedule.summary_time", &self.schedule.summary_time),
            ("schedule.cleanup_time", &self.schedule.cleanup_time),
        ] {
            if chrono::NaiveTime::parse_from_str(value, "%H:%M").is_err() {
                return Err(ConfigError::Message(format!(
                    "{key} must be HH:MM, got '{value}'"
                )));
            }
        }
        if self.schedule.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "schedule.timezone is not a valid IANA timezone: '{}'",
                self.schedule.timezone
            )));
        }

        if self.system.data_retention_days == 0 {
            return Err(ConfigError::Message(
                "system.data_retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                enabled: default_enabled(),
                chunk_duration_minutes: default_audio_chunk_minutes(),
                capture_command: default_audio_command(),
                file_extension: default_audio_extension(),
                retain_artifacts: default_retain_true(),
            },
            screen: ScreenConfig {
                enabled: default_enabled(),
                capture_interval_seconds: default_screen_interval(),
                capture_command: default_screen_command(),
                format: default_screen_format(),
                active_window_command: String::new(),
                retain_artifacts: false,
            },
            keyboard: KeyboardConfig {
                enabled: default_enabled(),
                flush_interval_minutes: default_keyboard_flush_minutes(),
            },
            analysis: AnalysisConfig {
                api_key: String::new(),
                base_url: default_base_url(),
                transcription_model: default_transcription_model(),
                vision_model: default_vision_model(),
                summary_model: default_summary_model(),
                language: default_language(),
                request_timeout_seconds: default_request_timeout(),
                screen_prompt: default_screen_prompt(),
                keyboard_prompt: default_keyboard_prompt(),
                summary_prompt: default_summary_prompt(),
            },
            schedule: ScheduleConfig {
                summary_time: default_summary_time(),
                cleanup_time: default_cleanup_time(),
                timezone: default_timezone(),
                poll_interval_seconds: default_poll_interval(),
            },
            privacy: PrivacyConfig {
                pause_on_lock: default_enabled(),
                excluded_apps: Vec::new(),
                excluded_windows: Vec::new(),
            },
            system: SystemConfig {
                data_dir: default_data_dir(),
                log_dir: default_log_dir(),
                data_retention_days: default_retention_days(),
                log_retention_days: default_retention_days(),
            },
        }
    }
}

// Default value functions
fn default_enabled() -> bool {
    true
}
fn default_retain_true() -> bool {
    true
}

fn default_audio_chunk_minutes() -> u64 {
    10
}
fn default_audio_command() -> String {
    "ffmpeg -hide_banner -loglevel error -f pulse -i default -t {duration} -y {path}".to_string()
}
fn default_audio_extension() -> String {
    "wav".to_string()
}

fn default_screen_interval() -> u64 {
    30
}
fn default_screen_command() -> String {
    "scrot -o -q 70 {path}".to_string()
}
fn default_screen_format() -> String {
    "jpg".to_string()
}

fn default_keyboard_flush_minutes() -> u64 {
    5
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_transcription_model() -> String {
    "openai/whisper-1".to_string()
}
fn default_vision_model() -> String {
    "google/gemini-2.0-flash-lite-001".to_string()
}
fn default_summary_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_screen_prompt() -> String {
    "Analyze this screenshot and briefly describe: \
     1. Which application or site is open. \
     2. What the user appears to be doing. \
     3. Any important visible text. \
     Be concise (at most 3 lines)."
        .to_string()
}
fn default_keyboard_prompt() -> String {
    "Analyze the following keystroke log: \
     1. Summarize the main activities and topics. \
     2. Identify intentions, tasks, or applications used, from context. \
     3. Be concise and highlight productivity signals."
        .to_string()
}
fn default_summary_prompt() -> String {
    "Review the content of my day and write an executive summary with: \
     1. Main activities. \
     2. Decisions taken. \
     3. Open items identified."
        .to_string()
}

fn default_summary_time() -> String {
    "22:00".to_string()
}
fn default_cleanup_time() -> String {
    "00:30".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_poll_interval() -> u64 {
    30
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_retention_days() -> u32 {
    7
}
