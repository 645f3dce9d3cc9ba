//! Builds real providers and devices from the loaded configuration.

use anyhow::{Context, Result};
use careconnect_core::{AppConfig, DialogueSession, GeminiBackend, SbarReport, TomlCredentialStore};
use careconnect_voice::{
    remote_tiers, AudioOutput, EspeakSynthesizer, MicrophoneRecognizer, NullOutput, Recognizer,
    RodioOutput, SynthesisTiers,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub fn open_credentials(config: &AppConfig) -> Result<Arc<TomlCredentialStore>> {
    let store = TomlCredentialStore::open(&config.credentials_path).with_context(|| {
        format!("opening credentials at {}", config.credentials_path.display())
    })?;
    Ok(Arc::new(store))
}

pub fn new_session(config: &AppConfig, credentials: Arc<TomlCredentialStore>) -> DialogueSession {
    let backend = Arc::new(GeminiBackend::new(&config.dialogue));
    DialogueSession::new(backend, credentials, &config.dialogue)
}

/// Remote tiers from stored keys, espeak-ng locally, rodio for output. A host without an
/// output device still gets a call, with speech reported as failing.
pub async fn synthesis_tiers(
    config: &AppConfig,
    credentials: &TomlCredentialStore,
) -> SynthesisTiers {
    let output: Arc<dyn AudioOutput> = match RodioOutput::new() {
        Ok(output) => Arc::new(output),
        Err(e) => {
            warn!(error = %e, "No audio output; replies will be text only");
            Arc::new(NullOutput)
        }
    };
    SynthesisTiers {
        remote: remote_tiers(&config.synthesis, credentials),
        local: Some(Arc::new(EspeakSynthesizer::new(&config.synthesis).await)),
        output,
        preferred_voices: config.synthesis.preferred_voices.clone(),
    }
}

pub fn recognizer(config: &AppConfig, credentials: &TomlCredentialStore) -> Arc<dyn Recognizer> {
    Arc::new(MicrophoneRecognizer::new(config.capture.clone(), credentials))
}

pub fn save_report(dir: &Path, report: &SbarReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(report.file_name());
    std::fs::write(&path, report.to_plain_text())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
