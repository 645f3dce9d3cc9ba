//! Speech capture adapter.
//!
//! A capture session is single-shot: it reports `Started`, listens for one utterance and
//! reports exactly one `Finished` carrying the transcript (or why there is none). Failures
//! never escape as errors; they become `CaptureOutcome::Failed`.

use crate::audio::AudioCapture;
use crate::error::{VoiceError, VoiceResult};
use crate::listener::{listen_once, ListenOutcome};
use crate::transcribe::{OpenAiTranscriber, TranscriptionBackend};
use async_trait::async_trait;
use careconnect_core::{CaptureConfig, CredentialKind, CredentialStore};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Transcript(String),
    NoSpeech,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started { id: CaptureId },
    Finished { id: CaptureId, outcome: CaptureOutcome },
}

/// Receives capture events; called from the capture task.
pub type CaptureListener = Arc<dyn Fn(CaptureEvent) + Send + Sync>;

/// Speech recognizer behind the capture adapter.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Decided once at construction.
    fn is_supported(&self) -> bool;

    /// Listen for one utterance. `Ok(None)` when nothing was said.
    async fn recognize(&self, cancel: CancellationToken) -> VoiceResult<Option<String>>;
}

/// Default microphone + WebRTC VAD + remote transcription.
pub struct MicrophoneRecognizer {
    config: CaptureConfig,
    transcriber: Option<Arc<dyn TranscriptionBackend>>,
    supported: bool,
}

impl MicrophoneRecognizer {
    /// Supported when an input device exists and a transcription key is configured.
    pub fn new(config: CaptureConfig, credentials: &dyn CredentialStore) -> Self {
        let transcriber: Option<Arc<dyn TranscriptionBackend>> = credentials
            .get(CredentialKind::Transcription)
            .and_then(|key| match OpenAiTranscriber::new(&config, key) {
                Ok(t) => Some(Arc::new(t) as Arc<dyn TranscriptionBackend>),
                Err(e) => {
                    warn!(target: "careconnect::voice", "Transcriber unavailable: {}", e);
                    None
                }
            });
        Self::with_transcriber(config, transcriber)
    }

    pub fn with_transcriber(
        config: CaptureConfig,
        transcriber: Option<Arc<dyn TranscriptionBackend>>,
    ) -> Self {
        let has_device = AudioCapture::has_input_device();
        let supported = has_device && transcriber.is_some();
        if !has_device {
            info!(target: "careconnect::voice", "No input device; speech capture disabled");
        } else if transcriber.is_none() {
            info!(target: "careconnect::voice", "No transcription key; speech capture disabled");
        }
        Self {
            config,
            transcriber,
            supported,
        }
    }
}

#[async_trait]
impl Recognizer for MicrophoneRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn recognize(&self, cancel: CancellationToken) -> VoiceResult<Option<String>> {
        let transcriber = match (&self.transcriber, self.supported) {
            (Some(t), true) => Arc::clone(t),
            _ => return Err(VoiceError::Unsupported("speech capture".to_string())),
        };

        let (tx, rx) = oneshot::channel();
        let config = self.config.clone();
        let token = cancel.clone();
        thread::Builder::new()
            .name("careconnect-listen".to_string())
            .spawn(move || {
                let _ = tx.send(listen_once(&config, &token));
            })?;

        let outcome = rx
            .await
            .map_err(|_| VoiceError::AudioStream("listener thread exited".to_string()))??;
        match outcome {
            None | Some(ListenOutcome::NoSpeech) => Ok(None),
            Some(ListenOutcome::Utterance(pcm)) => {
                let text = transcriber.transcribe(&pcm, self.config.sample_rate).await?;
                Ok((!text.is_empty()).then_some(text))
            }
        }
    }
}

/// Capture adapter owned by the call runtime.
pub struct SpeechCapture {
    recognizer: Arc<dyn Recognizer>,
    listener: CaptureListener,
    active: Option<(CaptureId, CancellationToken)>,
}

impl SpeechCapture {
    pub fn new(recognizer: Arc<dyn Recognizer>, listener: CaptureListener) -> Self {
        Self {
            recognizer,
            listener,
            active: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_supported()
    }

    /// Start capture session `id`. No-op returning `false` when unsupported.
    pub fn start(&mut self, id: CaptureId) -> bool {
        if !self.is_supported() {
            return false;
        }
        self.cancel();

        let token = CancellationToken::new();
        self.active = Some((id, token.clone()));
        let recognizer = Arc::clone(&self.recognizer);
        let listener = Arc::clone(&self.listener);

        tokio::spawn(async move {
            listener(CaptureEvent::Started { id });
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => CaptureOutcome::Cancelled,
                result = recognizer.recognize(token.clone()) => match result {
                    Ok(Some(text)) => CaptureOutcome::Transcript(text),
                    Ok(None) => CaptureOutcome::NoSpeech,
                    Err(e) => {
                        warn!(target: "careconnect::voice", capture = id.0, "Capture failed: {}", e);
                        CaptureOutcome::Failed(e.to_string())
                    }
                },
            };
            debug!(target: "careconnect::voice", capture = id.0, ?outcome, "Capture finished");
            listener(CaptureEvent::Finished { id, outcome });
        });
        true
    }

    /// Cancel the running session, if any. It finishes with `Cancelled`.
    pub fn cancel(&mut self) {
        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Scripted {
        reply: Option<&'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl Recognizer for Scripted {
        fn is_supported(&self) -> bool {
            true
        }

        async fn recognize(&self, _cancel: CancellationToken) -> VoiceResult<Option<String>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.map(str::to_string))
        }
    }

    struct Absent;

    #[async_trait]
    impl Recognizer for Absent {
        fn is_supported(&self) -> bool {
            false
        }

        async fn recognize(&self, _cancel: CancellationToken) -> VoiceResult<Option<String>> {
            Err(VoiceError::Unsupported("test".into()))
        }
    }

    fn channel_listener() -> (CaptureListener, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: CaptureListener = Arc::new(move |ev| {
            let _ = tx.send(ev);
        });
        (listener, rx)
    }

    #[tokio::test]
    async fn reports_started_then_transcript() {
        let (listener, mut rx) = channel_listener();
        let mut capture = SpeechCapture::new(
            Arc::new(Scripted {
                reply: Some("I have a fever"),
                delay: Duration::from_millis(5),
            }),
            listener,
        );
        assert!(capture.start(CaptureId(1)));
        assert_eq!(rx.recv().await, Some(CaptureEvent::Started { id: CaptureId(1) }));
        assert_eq!(
            rx.recv().await,
            Some(CaptureEvent::Finished {
                id: CaptureId(1),
                outcome: CaptureOutcome::Transcript("I have a fever".into())
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_finishes_exactly_once() {
        let (listener, mut rx) = channel_listener();
        let mut capture = SpeechCapture::new(
            Arc::new(Scripted {
                reply: Some("late"),
                delay: Duration::from_secs(5),
            }),
            listener,
        );
        capture.start(CaptureId(7));
        assert!(matches!(rx.recv().await, Some(CaptureEvent::Started { .. })));
        capture.cancel();
        assert_eq!(
            rx.recv().await,
            Some(CaptureEvent::Finished {
                id: CaptureId(7),
                outcome: CaptureOutcome::Cancelled
            })
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_capture_is_a_no_op() {
        let (listener, mut rx) = channel_listener();
        let mut capture = SpeechCapture::new(Arc::new(Absent), listener);
        assert!(!capture.is_supported());
        assert!(!capture.start(CaptureId(1)));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
