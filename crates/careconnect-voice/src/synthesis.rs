//! Speech synthesis adapter: remote tiers in order, then local synthesis.
//!
//! `speak` never queues: it cancels whatever utterance is in flight first. Every utterance
//! ends with exactly one `Finished` event; `Started` is reported only once audio is ready
//! and about to play.

use crate::audio::{AudioClip, AudioOutput, PlaybackOutcome};
use crate::local_tts::LocalSynthesizer;
use crate::remote_tts::RemoteSynthesizer;
use crate::voices::select_voice;
use careconnect_core::SynthesisConfig;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// No tier can produce audio on this host.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started { id: UtteranceId },
    Finished { id: UtteranceId, outcome: SpeechOutcome },
}

/// Receives synthesis events; called from the synthesis task or from `cancel`.
pub type SynthesisListener = Arc<dyn Fn(SynthesisEvent) + Send + Sync>;

/// Voice parameters resolved per `speak` call.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Local voice requested by name; falls back to the selection cascade.
    pub voice: Option<String>,
    pub pitch: f32,
    pub rate: f32,
}

impl VoiceConfig {
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            voice: None,
            pitch: config.pitch,
            rate: config.rate,
        }
    }
}

/// Everything that can turn text into sound, plus where the sound goes.
#[derive(Clone)]
pub struct SynthesisTiers {
    pub remote: Vec<Arc<dyn RemoteSynthesizer>>,
    pub local: Option<Arc<dyn LocalSynthesizer>>,
    pub output: Arc<dyn AudioOutput>,
    pub preferred_voices: Vec<String>,
}

impl SynthesisTiers {
    pub fn is_supported(&self) -> bool {
        !self.remote.is_empty() || self.local.as_ref().is_some_and(|l| l.is_supported())
    }

    /// First audio any tier produces.
    async fn render(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, SpeechOutcome> {
        for tier in &self.remote {
            match tier.synthesize(text).await {
                Ok(audio) => {
                    debug!(target: "careconnect::voice", tier = tier.name(), bytes = audio.len(), "Remote synthesis");
                    return Ok(audio);
                }
                Err(e) => {
                    warn!(target: "careconnect::voice", tier = tier.name(), "Remote synthesis failed: {}", e)
                }
            }
        }

        match &self.local {
            Some(local) if local.is_supported() => {
                let catalog = local.voices().await;
                let chosen = select_voice(&catalog, voice.voice.as_deref(), &self.preferred_voices);
                debug!(
                    target: "careconnect::voice",
                    voice = chosen.map(|v| v.name.as_str()).unwrap_or("default"),
                    "Local synthesis"
                );
                local
                    .synthesize(text, chosen, voice.pitch, voice.rate)
                    .await
                    .map_err(|e| {
                        warn!(target: "careconnect::voice", "Local synthesis failed: {}", e);
                        SpeechOutcome::Failed(e.to_string())
                    })
            }
            _ if self.remote.is_empty() => Err(SpeechOutcome::Unsupported),
            _ => Err(SpeechOutcome::Failed(
                "all remote tiers failed and local synthesis is unavailable".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Active {
    id: UtteranceId,
    playing: bool,
}

/// Synthesis adapter owned by the call runtime (or the text chat).
pub struct SpeechSynthesis {
    tiers: SynthesisTiers,
    defaults: VoiceConfig,
    listener: SynthesisListener,
    active: Arc<Mutex<Option<Active>>>,
    task: Option<JoinHandle<()>>,
}

impl SpeechSynthesis {
    pub fn new(tiers: SynthesisTiers, defaults: VoiceConfig, listener: SynthesisListener) -> Self {
        Self {
            tiers,
            defaults,
            listener,
            active: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.tiers.is_supported()
    }

    /// Speak `text` as utterance `id`, preempting any utterance in flight.
    pub fn speak(&mut self, id: UtteranceId, text: &str, voice: Option<VoiceConfig>) {
        self.cancel();

        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(Active { id, playing: false });
        }
        let tiers = self.tiers.clone();
        let voice = voice.unwrap_or_else(|| self.defaults.clone());
        let listener = Arc::clone(&self.listener);
        let active = Arc::clone(&self.active);
        let text = text.trim().to_string();

        self.task = Some(tokio::spawn(async move {
            if text.is_empty() {
                settle(&active, &listener, id, SpeechOutcome::Completed);
                return;
            }
            let audio = match tiers.render(&text, &voice).await {
                Ok(audio) => audio,
                Err(outcome) => {
                    settle(&active, &listener, id, outcome);
                    return;
                }
            };

            let done = match begin_playback(&active, &listener, id, &tiers.output, audio) {
                Some(done) => done,
                None => return,
            };
            let outcome = match done.await {
                Ok(PlaybackOutcome::Finished) => SpeechOutcome::Completed,
                Ok(PlaybackOutcome::Stopped) => SpeechOutcome::Cancelled,
                Ok(PlaybackOutcome::Failed(e)) => SpeechOutcome::Failed(e),
                Err(_) => SpeechOutcome::Failed("audio output closed".to_string()),
            };
            settle(&active, &listener, id, outcome);
        }));
    }

    /// Cancel the utterance in flight; it finishes with `Cancelled` before this returns.
    pub fn cancel(&mut self) {
        let Ok(mut slot) = self.active.lock() else {
            return;
        };
        if let Some(current) = slot.take() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            if current.playing {
                self.tiers.output.stop();
            }
            debug!(target: "careconnect::voice", utterance = current.id.0, "Speech cancelled");
            (self.listener)(SynthesisEvent::Finished {
                id: current.id,
                outcome: SpeechOutcome::Cancelled,
            });
        }
    }
}

/// Report `Started` and hand the audio to the output, unless `id` was cancelled meanwhile.
fn begin_playback(
    active: &Mutex<Option<Active>>,
    listener: &SynthesisListener,
    id: UtteranceId,
    output: &Arc<dyn AudioOutput>,
    audio: Vec<u8>,
) -> Option<oneshot::Receiver<PlaybackOutcome>> {
    let mut slot = active.lock().ok()?;
    match slot.as_mut() {
        Some(current) if current.id == id => {
            current.playing = true;
            listener(SynthesisEvent::Started { id });
            Some(output.play(AudioClip::once(audio)))
        }
        _ => None,
    }
}

/// Emit the single `Finished` for `id` if nobody else has.
fn settle(
    active: &Mutex<Option<Active>>,
    listener: &SynthesisListener,
    id: UtteranceId,
    outcome: SpeechOutcome,
) {
    let Ok(mut slot) = active.lock() else {
        return;
    };
    if slot.is_some_and(|current| current.id == id) {
        *slot = None;
        listener(SynthesisEvent::Finished { id, outcome });
    }
}
