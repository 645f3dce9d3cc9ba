//! Single-shot utterance capture: microphone → VAD → gap logic.
//!
//! Unlike a continuous turn detector, a listen ends at the first committed utterance
//! (speech followed by `gap_ms` of silence) or when nobody speaks within the no-speech
//! window. Time is measured in captured audio, not wall clock, so the gap logic is
//! deterministic for a given frame sequence.

use crate::audio::{AudioCapture, AudioChunk, AudioConfig};
use crate::error::VoiceResult;
use crate::vad::{frame_len, VadDetector};
use careconnect_core::CaptureConfig;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a listen ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenOutcome {
    /// PCM of the committed utterance.
    Utterance(Vec<f32>),
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapState {
    Idle,
    Speaking,
    SilenceDetected,
}

/// Gap logic for one utterance.
pub struct UtteranceDetector {
    gap: Duration,
    min_speech: Duration,
    max_utterance: Duration,
    no_speech_timeout: Duration,
    state: GapState,
    elapsed: Duration,
    speech: Duration,
    silence: Duration,
    buffer: Vec<f32>,
}

impl UtteranceDetector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            gap: Duration::from_millis(config.gap_ms),
            min_speech: Duration::from_millis(config.min_speech_ms),
            max_utterance: Duration::from_secs(config.max_utterance_secs),
            no_speech_timeout: Duration::from_secs(config.no_speech_timeout_secs),
            state: GapState::Idle,
            elapsed: Duration::ZERO,
            speech: Duration::ZERO,
            silence: Duration::ZERO,
            buffer: Vec::new(),
        }
    }

    /// Feed one classified frame lasting `frame`. Returns the outcome once the listen is over.
    pub fn push(&mut self, is_speech: bool, samples: &[f32], frame: Duration) -> Option<ListenOutcome> {
        self.elapsed += frame;

        match (self.state, is_speech) {
            (GapState::Idle, true) => {
                debug!(target: "careconnect::voice", "Speech started");
                self.state = GapState::Speaking;
                self.speech = frame;
                self.silence = Duration::ZERO;
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
            }
            (GapState::Idle, false) => {
                if self.elapsed >= self.no_speech_timeout {
                    return Some(ListenOutcome::NoSpeech);
                }
            }
            (GapState::Speaking, true) | (GapState::SilenceDetected, true) => {
                self.state = GapState::Speaking;
                self.speech += self.silence + frame;
                self.silence = Duration::ZERO;
                self.buffer.extend_from_slice(samples);
            }
            (GapState::Speaking, false) | (GapState::SilenceDetected, false) => {
                self.state = GapState::SilenceDetected;
                self.silence += frame;
                self.buffer.extend_from_slice(samples);
                if self.silence >= self.gap {
                    return self.commit();
                }
            }
        }

        if self.state == GapState::Speaking && self.speech >= self.max_utterance {
            info!(target: "careconnect::voice", "Max utterance length reached, committing");
            return self.commit();
        }
        None
    }

    fn commit(&mut self) -> Option<ListenOutcome> {
        if self.speech < self.min_speech {
            debug!(target: "careconnect::voice", speech = ?self.speech, "Speech too short, ignoring");
            self.state = GapState::Idle;
            self.speech = Duration::ZERO;
            self.silence = Duration::ZERO;
            self.buffer.clear();
            return (self.elapsed >= self.no_speech_timeout).then_some(ListenOutcome::NoSpeech);
        }
        self.state = GapState::Idle;
        Some(ListenOutcome::Utterance(std::mem::take(&mut self.buffer)))
    }
}

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Listen on the default microphone until one utterance is committed.
///
/// Blocking: run it on a dedicated thread (the cpal stream and the VAD are !Send). Returns
/// `Ok(None)` when cancelled.
pub fn listen_once(config: &CaptureConfig, cancel: &CancellationToken) -> VoiceResult<Option<ListenOutcome>> {
    let chunk_size = frame_len(config.sample_rate);
    let mut vad = VadDetector::new(config.sample_rate, config.vad_mode)?;
    let capture = AudioCapture::new(AudioConfig {
        sample_rate: config.sample_rate,
        channels: 1,
        buffer_size: chunk_size,
    })?;

    let (tx, rx) = std_mpsc::channel::<AudioChunk>();
    let _stream = capture.start_capture(tx)?;
    let frame = Duration::from_millis(30);
    let mut detector = UtteranceDetector::new(config);

    info!(target: "careconnect::voice", gap_ms = config.gap_ms, "Listening");
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let chunk = match rx.recv_timeout(CANCEL_POLL) {
            Ok(c) => c,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                return Err(crate::error::VoiceError::AudioStream(
                    "capture stream closed".to_string(),
                ))
            }
        };
        if chunk.samples.len() != chunk_size {
            continue;
        }
        let is_speech = vad.is_speech(&chunk.samples)?;
        if let Some(outcome) = detector.push(is_speech, &chunk.samples, frame) {
            return Ok(Some(outcome));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(30);

    fn detector() -> UtteranceDetector {
        UtteranceDetector::new(&CaptureConfig::default())
    }

    fn feed(d: &mut UtteranceDetector, speech: bool, frames: usize) -> Option<ListenOutcome> {
        let chunk = vec![if speech { 0.5 } else { 0.0 }; 480];
        for _ in 0..frames {
            if let Some(out) = d.push(speech, &chunk, FRAME) {
                return Some(out);
            }
        }
        None
    }

    #[test]
    fn commits_after_gap() {
        let mut d = detector();
        assert!(feed(&mut d, false, 10).is_none());
        assert!(feed(&mut d, true, 20).is_none());
        // 800 ms gap = 27 frames of 30 ms
        assert!(feed(&mut d, false, 26).is_none());
        match feed(&mut d, false, 1) {
            Some(ListenOutcome::Utterance(pcm)) => assert_eq!(pcm.len(), 47 * 480),
            other => panic!("expected utterance, got {:?}", other),
        }
    }

    #[test]
    fn short_pause_does_not_split_utterance() {
        let mut d = detector();
        feed(&mut d, true, 10);
        assert!(feed(&mut d, false, 10).is_none());
        assert!(feed(&mut d, true, 10).is_none());
        assert!(matches!(feed(&mut d, false, 30), Some(ListenOutcome::Utterance(_))));
    }

    #[test]
    fn blip_shorter_than_min_speech_is_dropped() {
        let mut d = detector();
        feed(&mut d, true, 2); // 60 ms
        assert!(feed(&mut d, false, 27).is_none());
        assert_eq!(d.state, GapState::Idle);
    }

    #[test]
    fn silence_ends_with_no_speech() {
        let mut d = detector();
        // 8 s window
        assert!(feed(&mut d, false, 266).is_none());
        assert_eq!(feed(&mut d, false, 1), Some(ListenOutcome::NoSpeech));
    }

    #[test]
    fn long_speech_is_cut_at_max_length() {
        let mut d = detector();
        assert!(matches!(feed(&mut d, true, 1000), Some(ListenOutcome::Utterance(_))));
    }
}
