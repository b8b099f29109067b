use crate::analysis::AnalysisService;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::multipart;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// OpenRouter REST client backing all three analysis paths.
///
/// Audio goes through the multipart transcription endpoint; images are sent
/// inline as base64 data URLs on the chat endpoint; text analysis and
/// summaries use plain chat completions.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    transcription_model: String,
    vision_model: String,
    summary_model: String,
    language: String,
}

const VISION_MAX_TOKENS: u32 = 500;

impl OpenRouterClient {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            transcription_model: config.transcription_model.clone(),
            vision_model: config.vision_model.clone(),
            summary_model: config.summary_model.clone(),
            language: config.language.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fail on non-2xx with the response body as context, truncated so a
    /// large HTML error page does not flood the logs.
    async fn check_status(response: reqwest::Response) -> Result<Value, AnalysisError> {
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(512);
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response.json().await?)
    }

    fn chat_content(body: &Value) -> Result<String, AnalysisError> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AnalysisError::MalformedResponse {
                message: "chat completion has no choices[0].message.content".to_string(),
            })
    }

    async fn chat(&self, model: &str, messages: Value, max_tokens: Option<u32>) -> Result<String, AnalysisError> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(limit) = max_tokens {
            payload["max_tokens"] = json!(limit);
        }

        debug!(model, "Sending chat completion request");
        let response = self
            .http
            .post(self.endpoint("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body = Self::check_status(response).await?;
        Self::chat_content(&body)
    }

    fn image_mime(image: &Path) -> &'static str {
        match image.extension().and_then(|e| e.to_str()) {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "image/jpeg",
        }
    }

    fn audio_mime(audio: &Path) -> &'static str {
        match audio.extension().and_then(|e| e.to_str()) {
            Some("mp3") => "audio/mpeg",
            Some("ogg") => "audio/ogg",
            Some("flac") => "audio/flac",
            _ => "audio/wav",
        }
    }

    async fn read_artifact(path: &Path) -> Result<Vec<u8>, AnalysisError> {
        if !path.exists() {
            return Err(AnalysisError::MissingArtifact {
                path: path.display().to_string(),
            });
        }
        tokio::fs::read(path)
            .await
            .map_err(|source| AnalysisError::ArtifactRead {
                path: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl AnalysisService for OpenRouterClient {
    async fn transcribe(&self, audio: &Path) -> Result<String, AnalysisError> {
        let bytes = Self::read_artifact(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(Self::audio_mime(audio))
            .map_err(AnalysisError::Request)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone())
            .text("language", self.language.clone());

        debug!(file = %audio.display(), "Sending transcription request");
        let response = self
            .http
            .post(self.endpoint("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let body = Self::check_status(response).await?;

        body["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AnalysisError::MalformedResponse {
                message: "transcription response has no text field".to_string(),
            })
    }

    async fn describe_image(&self, image: &Path, prompt: &str) -> Result<String, AnalysisError> {
        let bytes = Self::read_artifact(image).await?;
        if bytes.len() > 4 * 1024 * 1024 {
            warn!(
                file = %image.display(),
                bytes = bytes.len(),
                "Large screenshot going inline as base64"
            );
        }
        let data_url = format!(
            "data:{};base64,{}",
            Self::image_mime(image),
            BASE64.encode(&bytes)
        );

        let messages = json!([{
            "role": "user",
            "content": [
                {"type": "image_url", "image_url": {"url": data_url}},
                {"type": "text", "text": prompt},
            ],
        }]);
        self.chat(&self.vision_model, messages, Some(VISION_MAX_TOKENS))
            .await
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, AnalysisError> {
        let messages = json!([
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_content},
        ]);
        self.chat(&self.summary_model, messages, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_content_extraction() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "  hello  "}}]
        });
        assert_eq!(OpenRouterClient::chat_content(&body).unwrap(), "hello");

        let empty = json!({"choices": []});
        assert!(matches!(
            OpenRouterClient::chat_content(&empty),
            Err(AnalysisError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(OpenRouterClient::image_mime(Path::new("a.png")), "image/png");
        assert_eq!(OpenRouterClient::image_mime(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(OpenRouterClient::image_mime(Path::new("noext")), "image/jpeg");
        assert_eq!(OpenRouterClient::audio_mime(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(OpenRouterClient::audio_mime(Path::new("a.wav")), "audio/wav");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_a_request_error() {
        let err = OpenRouterClient::read_artifact(Path::new("/nonexistent/a.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingArtifact { .. }));
    }
}
