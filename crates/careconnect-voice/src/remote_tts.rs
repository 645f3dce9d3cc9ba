//! Remote synthesis tiers (ElevenLabs, then an optional speech proxy).
//!
//! Each tier sends the raw text and returns encoded audio (MP3). Which tiers exist is
//! decided once from configuration and stored credentials.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use careconnect_core::{CredentialKind, CredentialStore, SynthesisConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A network speech provider.
#[async_trait]
pub trait RemoteSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

pub struct ElevenLabsTts {
    api_base: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    stability: f32,
    similarity_boost: f32,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(config: &SynthesisConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_base: config.elevenlabs_api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            voice_id: config.elevenlabs_voice_id.clone(),
            model_id: config.elevenlabs_model_id.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            client: http_client(config),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/text-to-speech/{}", self.api_base, self.voice_id)
    }
}

#[async_trait]
impl RemoteSynthesizer for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let body = ElevenLabsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        };
        let res = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        audio_body(res).await
    }
}

#[derive(Serialize)]
struct ProxyRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Speech endpoint taking `{text, voice}` and answering `audio/mpeg`.
pub struct ProxyTts {
    url: String,
    voice: String,
    client: reqwest::Client,
}

impl ProxyTts {
    pub fn new(config: &SynthesisConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            voice: config.proxy_voice.clone(),
            client: http_client(config),
        }
    }
}

#[async_trait]
impl RemoteSynthesizer for ProxyTts {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let res = self
            .client
            .post(&self.url)
            .json(&ProxyRequest {
                text,
                voice: &self.voice,
            })
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        audio_body(res).await
    }
}

async fn audio_body(res: reqwest::Response) -> VoiceResult<Vec<u8>> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
    }
    let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
    if bytes.is_empty() {
        return Err(VoiceError::Tts("TTS API returned no audio".to_string()));
    }
    Ok(bytes.to_vec())
}

fn http_client(config: &SynthesisConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Configured remote tiers, in the order they are tried.
pub fn remote_tiers(
    config: &SynthesisConfig,
    credentials: &dyn CredentialStore,
) -> Vec<Arc<dyn RemoteSynthesizer>> {
    let mut tiers: Vec<Arc<dyn RemoteSynthesizer>> = Vec::new();
    if let Some(key) = credentials.get(CredentialKind::ElevenLabs) {
        tiers.push(Arc::new(ElevenLabsTts::new(config, key)));
    }
    if let Some(url) = config.proxy_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        tiers.push(Arc::new(ProxyTts::new(config, url)));
    }
    let names: Vec<&str> = tiers.iter().map(|t| t.name()).collect();
    info!(target: "careconnect::voice", tiers = ?names, "Remote synthesis tiers");
    tiers
}
