//! Local platform synthesis via `espeak-ng`.
//!
//! The engine writes WAV to stdout (`--stdout`), which the audio output decodes directly.
//! The voice catalog comes from `espeak-ng --voices`. Loading starts in the background at
//! construction; an empty catalog is queried again whenever voices are asked for.

use crate::error::{VoiceError, VoiceResult};
use crate::voices::{normalize_lang, Voice};
use async_trait::async_trait;
use careconnect_core::SynthesisConfig;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Maximum text input size for synthesis (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// On-device synthesizer: the last tier, used when no remote provider produced audio.
#[async_trait]
pub trait LocalSynthesizer: Send + Sync {
    /// Decided once at construction.
    fn is_supported(&self) -> bool;

    async fn voices(&self) -> Vec<Voice>;

    /// Render `text` to encoded audio. `pitch` and `rate` are relative (1.0 = engine default).
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&Voice>,
        pitch: f32,
        rate: f32,
    ) -> VoiceResult<Vec<u8>>;
}

pub struct EspeakSynthesizer {
    binary: String,
    supported: bool,
    catalog: Arc<RwLock<Vec<Voice>>>,
}

impl EspeakSynthesizer {
    /// Probe the binary and start loading the voice catalog in the background.
    pub async fn new(config: &SynthesisConfig) -> Self {
        let synth = Self::probe(config).await;
        if synth.supported {
            let binary = synth.binary.clone();
            let catalog = Arc::clone(&synth.catalog);
            tokio::spawn(async move {
                load_catalog(&binary, &catalog).await;
            });
        }
        synth
    }

    async fn probe(config: &SynthesisConfig) -> Self {
        let binary = config.espeak_binary.clone();
        let supported = Command::new(&binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if supported {
            info!(target: "careconnect::voice", binary = %binary, "Local synthesis available");
        } else {
            info!(target: "careconnect::voice", binary = %binary, "Local synthesis not found");
        }
        Self {
            binary,
            supported,
            catalog: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

async fn query_voices(binary: &str) -> VoiceResult<Vec<Voice>> {
    let output = tokio::time::timeout(TTS_TIMEOUT, Command::new(binary).arg("--voices").output())
        .await
        .map_err(|_| VoiceError::Tts("voice listing timed out".to_string()))??;
    if !output.status.success() {
        return Err(VoiceError::Tts(format!(
            "{} --voices failed: {}",
            binary,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(parse_voice_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Query the engine and cache a non-empty result.
async fn load_catalog(binary: &str, catalog: &RwLock<Vec<Voice>>) -> Vec<Voice> {
    match query_voices(binary).await {
        Ok(voices) => {
            debug!(target: "careconnect::voice", count = voices.len(), "Voice catalog loaded");
            let mut cached = catalog.write().await;
            if cached.is_empty() {
                *cached = voices;
            }
            cached.clone()
        }
        Err(e) => {
            debug!(target: "careconnect::voice", "Voice catalog unavailable: {}", e);
            Vec::new()
        }
    }
}

#[async_trait]
impl LocalSynthesizer for EspeakSynthesizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn voices(&self) -> Vec<Voice> {
        if !self.supported {
            return Vec::new();
        }
        {
            let cached = self.catalog.read().await;
            if !cached.is_empty() {
                return cached.clone();
            }
        }
        load_catalog(&self.binary, &self.catalog).await
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&Voice>,
        pitch: f32,
        rate: f32,
    ) -> VoiceResult<Vec<u8>> {
        if !self.supported {
            return Err(VoiceError::Unsupported("local synthesis".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.binary);
        command.args(espeak_args(voice, pitch, rate));
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn {}: {}", self.binary, e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = text.to_string();
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for {}: {}", self.binary, e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VoiceError::Tts(format!("Failed to write stdin: {}", e))),
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("{} failed: {}", self.binary, stderr)));
        }
        Ok(output.stdout)
    }
}

/// espeak-ng: `-p` 0..=99 (50 default), `-s` words per minute (175 default).
fn espeak_args(voice: Option<&Voice>, pitch: f32, rate: f32) -> Vec<String> {
    let mut args = vec!["--stdout".to_string(), "--stdin".to_string()];
    if let Some(v) = voice {
        args.push("-v".to_string());
        args.push(v.id.clone());
    }
    args.push("-p".to_string());
    args.push(((pitch * 50.0).round().clamp(0.0, 99.0) as u32).to_string());
    args.push("-s".to_string());
    args.push(((rate * 175.0).round().clamp(80.0, 450.0) as u32).to_string());
    args
}

/// Parse `espeak-ng --voices`:
/// `Pty Language Age/Gender VoiceName File Other Languages`.
fn parse_voice_list(out: &str) -> Vec<Voice> {
    out.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            Some(Voice {
                name: cols[3].replace('_', " "),
                lang: normalize_lang(cols[1]),
                id: cols[1].to_string(),
            })
        })
        .collect()
}
