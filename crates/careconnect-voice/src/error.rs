//! Error types for the Care Connect voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised inside the voice adapters.
///
/// None of these cross the orchestrator boundary: the adapters turn them into
/// `Failed` outcomes on their event streams.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("VAD initialization failed: {0}")]
    VadInit(String),

    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Call runtime error: {0}")]
    Runtime(String),

    #[error("Capability not available: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}
