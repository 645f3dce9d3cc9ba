//! Voice Activity Detection using WebRTC VAD

use crate::error::{VoiceError, VoiceResult};
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// WebRTC VAD over 30 ms frames. Not `Send`: create it on the thread that feeds it.
pub struct VadDetector {
    vad: Vad,
    chunk_size: usize,
}

impl VadDetector {
    /// `sample_rate` must be 8000, 16000, 32000 or 48000 Hz; `mode` 0 (quality) to 3.
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::VadInit(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                    other
                )))
            }
        };
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(VoiceError::VadInit(format!(
                    "VAD mode must be 0-3, got {}",
                    other
                )))
            }
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);

        Ok(Self {
            vad,
            chunk_size: frame_len(sample_rate),
        })
    }

    /// Classify one frame of exactly [`chunk_size`](Self::chunk_size) samples.
    pub fn is_speech(&mut self, audio: &[f32]) -> VoiceResult<bool> {
        if audio.len() != self.chunk_size {
            return Err(VoiceError::VadProcessing(format!(
                "Expected {} samples, got {}",
                self.chunk_size,
                audio.len()
            )));
        }

        let audio_i16: Vec<i16> = audio
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        let speech = self
            .vad
            .is_voice_segment(&audio_i16)
            .map_err(|e| VoiceError::VadProcessing(format!("VAD processing failed: {:?}", e)))?;
        debug!(target: "careconnect::voice", speech, "VAD frame");
        Ok(speech)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Samples in one 30 ms frame.
pub fn frame_len(sample_rate: u32) -> usize {
    (sample_rate as usize * 30) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_initialization() {
        let detector = VadDetector::new(16000, 2).unwrap();
        assert_eq!(detector.chunk_size(), 480);
    }

    #[test]
    fn test_invalid_sample_rate() {
        assert!(VadDetector::new(44100, 2).is_err());
        assert!(VadDetector::new(16000, 7).is_err());
    }

    #[test]
    fn test_chunk_size_validation() {
        let mut detector = VadDetector::new(16000, 2).unwrap();
        assert!(detector.is_speech(&[0.0f32; 100]).is_err());
    }

    #[test]
    fn test_silence_detection() {
        let mut detector = VadDetector::new(16000, 3).unwrap();
        assert!(!detector.is_speech(&[0.0f32; 480]).unwrap());
    }
}
