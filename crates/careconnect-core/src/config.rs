//! Application configuration.
//!
//! Loaded with the `config` crate. Precedence: environment (`CARECONNECT__SECTION__KEY`) >
//! TOML file (`CARECONNECT_CONFIG`, default `config/careconnect.toml`) > built-in defaults.
//! Every field has a default, so an empty environment yields a working configuration.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | CARECONNECT__DIALOGUE__MODEL | gemini-pro | Generative Language model id |
//! | CARECONNECT__DIALOGUE__MAX_OUTPUT_TOKENS | 500 | Reply length bound |
//! | CARECONNECT__CALL__RING_DELAY_MS | 3000 | Ringing before the call connects |
//! | CARECONNECT__CALL__QUIESCENCE_MS | 500 | Idle wait before listening re-arms |
//! | CARECONNECT__CALL__HANGUP_DELAY_MS | 1000 | Hangup cue before returning to landing |
//! | CARECONNECT__SYNTHESIS__PROXY_URL | (unset) | Optional speech endpoint tier |
//! | CARECONNECT__CAPTURE__GAP_MS | 800 | Silence that closes an utterance |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreResult;

/// Config file used when `CARECONNECT_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config/careconnect.toml";

const ENV_CONFIG_PATH: &str = "CARECONNECT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dialogue: DialogueConfig,
    pub call: CallTimings,
    pub synthesis: SynthesisConfig,
    pub capture: CaptureConfig,
    /// TOML file holding the user's API keys.
    pub credentials_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dialogue: DialogueConfig::default(),
            call: CallTimings::default(),
            synthesis: SynthesisConfig::default(),
            capture: CaptureConfig::default(),
            credentials_path: PathBuf::from("user_config.toml"),
        }
    }
}

impl AppConfig {
    /// Load from `CARECONNECT_CONFIG` (or the default path) and the environment.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(Path::new(&path))
    }

    /// Load from an explicit file (missing file is fine) layered under the environment.
    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        let built = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("CARECONNECT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(built.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub api_base: String,
    pub model: String,
    pub max_output_tokens: u32,
    /// First assistant message of every session; spoken when the call connects.
    pub greeting: String,
    /// Appended in place of a reply whenever a turn fails.
    pub fallback_reply: String,
    pub request_timeout_secs: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-pro".to_string(),
            max_output_tokens: 500,
            greeting: "Hello! I am your AI Travel Doctor. How can I help you today?".to_string(),
            fallback_reply: "I'm sorry, I encountered an error. Please check your API key."
                .to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Fixed delays of the call lifecycle and the turn-taking loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTimings {
    pub ring_delay_ms: u64,
    pub quiescence_ms: u64,
    pub hangup_delay_ms: u64,
    pub tick_ms: u64,
    /// Consecutive capture/synthesis failures after which speech is reported as degraded.
    pub degraded_after_failures: u32,
}

impl Default for CallTimings {
    fn default() -> Self {
        Self {
            ring_delay_ms: 3000,
            quiescence_ms: 500,
            hangup_delay_ms: 1000,
            tick_ms: 1000,
            degraded_after_failures: 3,
        }
    }
}

impl CallTimings {
    pub fn ring_delay(&self) -> Duration {
        Duration::from_millis(self.ring_delay_ms)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn hangup_delay(&self) -> Duration {
        Duration::from_millis(self.hangup_delay_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub pitch: f32,
    pub rate: f32,
    /// Local voices tried by exact name, in order, before the heuristic fallbacks.
    pub preferred_voices: Vec<String>,
    pub elevenlabs_api_base: String,
    pub elevenlabs_voice_id: String,
    pub elevenlabs_model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Speech endpoint accepting `{text, voice}` and returning `audio/mpeg`.
    pub proxy_url: Option<String>,
    pub proxy_voice: String,
    pub espeak_binary: String,
    pub request_timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            pitch: 1.1,
            rate: 0.95,
            preferred_voices: vec![
                "Google US English".to_string(),
                "Samantha".to_string(),
                "Microsoft Zira Desktop - English (United States)".to_string(),
                "Google UK English Female".to_string(),
            ],
            elevenlabs_api_base: "https://api.elevenlabs.io".to_string(),
            elevenlabs_voice_id: "EXAVITQu4vr4xnSDxMaL".to_string(),
            elevenlabs_model_id: "eleven_monolingual_v1".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            proxy_url: None,
            proxy_voice: "en-US-JennyNeural".to_string(),
            espeak_binary: "espeak-ng".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 8000/16000/32000/48000 (WebRTC VAD constraint).
    pub sample_rate: u32,
    /// 0 (quality) ..= 3 (very aggressive).
    pub vad_mode: u8,
    pub gap_ms: u64,
    pub min_speech_ms: u64,
    pub max_utterance_secs: u64,
    /// Give up when nobody speaks within this window.
    pub no_speech_timeout_secs: u64,
    pub transcription_api_base: String,
    pub transcription_model: String,
    pub language: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad_mode: 2,
            gap_ms: 800,
            min_speech_ms: 200,
            max_utterance_secs: 30,
            no_speech_timeout_secs: 8,
            transcription_api_base: "https://api.openai.com/v1".to_string(),
            transcription_model: "whisper-1".to_string(),
            language: "en".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_call_behaviour() {
        let c = AppConfig::default();
        assert_eq!(c.call.ring_delay(), Duration::from_secs(3));
        assert_eq!(c.call.quiescence(), Duration::from_millis(500));
        assert_eq!(c.call.hangup_delay(), Duration::from_secs(1));
        assert_eq!(c.dialogue.max_output_tokens, 500);
        assert!((c.synthesis.pitch - 1.1).abs() < 1e-6);
        assert!((c.synthesis.rate - 0.95).abs() < 1e-6);
        assert_eq!(c.synthesis.preferred_voices[1], "Samantha");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("careconnect.toml");
        std::fs::write(
            &path,
            "[call]\nquiescence_ms = 250\n\n[dialogue]\nmodel = \"gemini-1.5-flash\"\n",
        )
        .unwrap();

        let c = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(c.call.quiescence_ms, 250);
        assert_eq!(c.call.ring_delay_ms, 3000);
        assert_eq!(c.dialogue.model, "gemini-1.5-flash");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let c = AppConfig::load_from_path(Path::new("/nonexistent/careconnect.toml")).unwrap();
        assert_eq!(c.capture.gap_ms, 800);
    }
}
