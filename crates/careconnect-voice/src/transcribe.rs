//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use crate::audio::encode_wav;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use careconnect_core::CaptureConfig;
use std::time::Duration;
use tracing::debug;

/// Backend for converting PCM into text.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe mono f32 PCM. Returns an empty string when nothing intelligible was said.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String>;
}

/// OpenAI Whisper (or any compatible provider) over multipart upload.
#[derive(Debug, Clone)]
pub struct OpenAiTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    client: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(config: &CaptureConfig, api_key: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: config.transcription_api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.transcription_model.clone(),
            language: config.language.clone(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl TranscriptionBackend for OpenAiTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav(samples, sample_rate);
        debug!(target: "careconnect::voice", bytes = wav.len(), "Uploading utterance");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(transcript_text(&json))
    }
}

fn transcript_text(json: &serde_json::Value) -> String {
    json.get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transcript_is_trimmed_text_field() {
        assert_eq!(transcript_text(&json!({"text": "  I have a fever \n"})), "I have a fever");
        assert_eq!(transcript_text(&json!({"error": "nope"})), "");
    }

    #[tokio::test]
    async fn empty_pcm_skips_upload() {
        let stt = OpenAiTranscriber::new(
            &CaptureConfig {
                transcription_api_base: "http://127.0.0.1:9/v1/".to_string(),
                ..CaptureConfig::default()
            },
            "key",
        )
        .unwrap();
        assert_eq!(stt.endpoint(), "http://127.0.0.1:9/v1/audio/transcriptions");
        assert_eq!(stt.transcribe(&[], 16000).await.unwrap(), "");
    }
}
