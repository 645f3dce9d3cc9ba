//! # Care Connect Voice - Call Orchestration
//!
//! Hands-free triage calls: speech capture with WebRTC VAD, tiered speech synthesis and the
//! turn-taking orchestrator that sequences them under the call lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Call Runtime                             │
//! │  ┌──────────────┐   CallEvent   ┌──────────────────────────┐    │
//! │  │   Capture    │──────────────→│   CallOrchestrator       │    │
//! │  │ cpal + VAD + │               │  (pure state machine)    │    │
//! │  │ transcription│←──────────────│  call state, TurnSignal, │    │
//! │  └──────────────┘    Command    │  DialogueSession, timers │    │
//! │  ┌──────────────┐               └──────────────────────────┘    │
//! │  │  Synthesis   │←── Speak ──────────┘        │ RequestReply    │
//! │  │ remote tiers │                             ↓                 │
//! │  │ → espeak-ng  │                     ┌──────────────┐          │
//! │  └──────┬───────┘                     │ Gemini (core)│          │
//! │         ↓                             └──────────────┘          │
//! │  ┌──────────────┐                                               │
//! │  │  Audio Out   │  speech and call cues share one output        │
//! │  │   (rodio)    │                                               │
//! │  └──────────────┘                                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod call;
pub mod capture;
pub mod error;
pub mod listener;
pub mod local_tts;
pub mod orchestrator;
pub mod remote_tts;
pub mod runtime;
pub mod synthesis;
pub mod transcribe;
pub mod turn;
pub mod vad;
pub mod voices;

pub use audio::{
    encode_wav, AudioCapture, AudioChunk, AudioClip, AudioConfig, AudioOutput, Cue, NullOutput,
    PlaybackOutcome, RodioOutput,
};
pub use call::CallState;
pub use capture::{
    CaptureEvent, CaptureId, CaptureListener, CaptureOutcome, MicrophoneRecognizer, Recognizer,
    SpeechCapture,
};
pub use error::{VoiceError, VoiceResult};
pub use listener::{listen_once, ListenOutcome, UtteranceDetector};
pub use local_tts::{EspeakSynthesizer, LocalSynthesizer};
pub use orchestrator::{
    CallEvent, CallOrchestrator, CallSnapshot, Command, TimerKind, TimerTicket,
};
pub use remote_tts::{remote_tiers, ElevenLabsTts, ProxyTts, RemoteSynthesizer};
pub use runtime::{spawn_call, CallHandle, CallParts, CallUpdate};
pub use synthesis::{
    SpeechOutcome, SpeechSynthesis, SynthesisEvent, SynthesisListener, SynthesisTiers,
    UtteranceId, VoiceConfig,
};
pub use transcribe::{OpenAiTranscriber, TranscriptionBackend};
pub use turn::TurnSignal;
pub use vad::VadDetector;
pub use voices::{select_voice, Voice};
