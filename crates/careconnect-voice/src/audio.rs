//! Audio capture and playback using CPAL and Rodio
//!
//! Capture delivers fixed-size chunks from the default input device. Playback goes through a
//! single [`AudioOutput`]: speech and call cues share it, so starting any clip stops the one
//! that was playing and the two never overlap.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::f32::consts::PI;
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Chunk size in samples (default: 480 for 30ms at 16kHz)
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            buffer_size: 480,
        }
    }
}

/// Audio chunk sent from the capture callback
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,
}

/// Microphone capture on the default input device
pub struct AudioCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

        debug!(
            target: "careconnect::voice",
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = config.sample_rate,
            "Opening input device"
        );

        // Surfaces a broken device before we try to build a stream on it.
        device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing; chunks of exactly `buffer_size` samples go to `chunk_tx`.
    ///
    /// The returned stream must stay alive (and on the thread that built it) while capturing.
    pub fn start_capture(self, chunk_tx: std_mpsc::Sender<AudioChunk>) -> VoiceResult<Stream> {
        let buffer_size = self.config.buffer_size;
        let mut sample_buffer = Vec::with_capacity(buffer_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    sample_buffer.push(sample);
                    if sample_buffer.len() >= buffer_size {
                        let chunk = AudioChunk {
                            samples: std::mem::replace(
                                &mut sample_buffer,
                                Vec::with_capacity(buffer_size),
                            ),
                        };
                        // Receiver gone means the listener finished; drop the rest.
                        let _ = chunk_tx.send(chunk);
                    }
                }
            },
            move |err| {
                warn!(target: "careconnect::voice", "Audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Whether the host exposes a default input device at all.
    pub fn has_input_device() -> bool {
        cpal::default_host().default_input_device().is_some()
    }
}

/// Encode f32 PCM (mono) as 16-bit little-endian WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Encoded audio (WAV or MP3) ready for the output.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub looped: bool,
}

impl AudioClip {
    pub fn once(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            looped: false,
        }
    }

    pub fn looped(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            looped: true,
        }
    }
}

/// How a clip left the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
    Failed(String),
}

/// The single audio output channel.
pub trait AudioOutput: Send + Sync {
    /// Stop whatever is playing and start `clip`. The receiver resolves once the clip ends.
    fn play(&self, clip: AudioClip) -> oneshot::Receiver<PlaybackOutcome>;

    /// Stop playback immediately. The playing clip resolves as `Stopped`.
    fn stop(&self);
}

enum PlaybackCommand {
    Play(AudioClip, oneshot::Sender<PlaybackOutcome>),
    Stop,
}

const PLAYBACK_POLL: Duration = Duration::from_millis(20);

/// Rodio output on a dedicated thread (the output stream is !Send on some platforms).
pub struct RodioOutput {
    commands: std_mpsc::Sender<PlaybackCommand>,
}

impl RodioOutput {
    /// Open the default output device. Fails when the host has none.
    pub fn new() -> VoiceResult<Self> {
        let (commands, rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        thread::Builder::new()
            .name("careconnect-playback".to_string())
            .spawn(move || playback_loop(rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(target: "careconnect::voice", "Audio output ready");
                Ok(Self { commands })
            }
            Ok(Err(e)) => Err(VoiceError::Playback(e)),
            Err(_) => Err(VoiceError::Playback(
                "playback thread exited during startup".to_string(),
            )),
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play(&self, clip: AudioClip) -> oneshot::Receiver<PlaybackOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        if let Err(std_mpsc::SendError(PlaybackCommand::Play(_, done_tx))) =
            self.commands.send(PlaybackCommand::Play(clip, done_tx))
        {
            let _ = done_tx.send(PlaybackOutcome::Failed("audio output closed".to_string()));
        }
        done_rx
    }

    fn stop(&self) {
        let _ = self.commands.send(PlaybackCommand::Stop);
    }
}

/// Placeholder output for hosts without a sound device. Every clip fails immediately.
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn play(&self, _clip: AudioClip) -> oneshot::Receiver<PlaybackOutcome> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(PlaybackOutcome::Failed("no audio output device".to_string()));
        rx
    }

    fn stop(&self) {}
}

fn playback_loop(
    rx: std_mpsc::Receiver<PlaybackCommand>,
    ready: std_mpsc::SyncSender<Result<(), String>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut current: Option<(Sink, oneshot::Sender<PlaybackOutcome>)> = None;
    loop {
        match rx.recv_timeout(PLAYBACK_POLL) {
            Ok(PlaybackCommand::Play(clip, done)) => {
                settle(&mut current, PlaybackOutcome::Stopped);
                match start_clip(&handle, clip) {
                    Ok(sink) => current = Some((sink, done)),
                    Err(e) => {
                        warn!(target: "careconnect::voice", "Playback failed: {}", e);
                        let _ = done.send(PlaybackOutcome::Failed(e.to_string()));
                    }
                }
            }
            Ok(PlaybackCommand::Stop) => settle(&mut current, PlaybackOutcome::Stopped),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if current.as_ref().is_some_and(|(sink, _)| sink.empty()) {
                    settle(&mut current, PlaybackOutcome::Finished);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                settle(&mut current, PlaybackOutcome::Stopped);
                break;
            }
        }
    }
    debug!(target: "careconnect::voice", "Playback thread exiting");
}

fn settle(
    current: &mut Option<(Sink, oneshot::Sender<PlaybackOutcome>)>,
    outcome: PlaybackOutcome,
) {
    if let Some((sink, done)) = current.take() {
        sink.stop();
        let _ = done.send(outcome);
    }
}

fn start_clip(handle: &OutputStreamHandle, clip: AudioClip) -> VoiceResult<Sink> {
    let sink = Sink::try_new(handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
    let source = Decoder::new(Cursor::new(clip.bytes))
        .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?
        .convert_samples::<f32>();
    if clip.looped {
        sink.append(source.repeat_infinite());
    } else {
        sink.append(source);
    }
    Ok(sink)
}

/// Call progress sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Ringback while connecting; loops until stopped.
    Ring,
    /// Played once when the call is hung up.
    Hangup,
}

const CUE_SAMPLE_RATE: u32 = 16000;

impl Cue {
    pub fn clip(self) -> AudioClip {
        match self {
            // 2 s of 440+480 Hz, 4 s of silence
            Cue::Ring => {
                let mut samples = dual_tone(440.0, 480.0, Duration::from_secs(2));
                samples.extend(silence(Duration::from_secs(4)));
                AudioClip::looped(encode_wav(&samples, CUE_SAMPLE_RATE))
            }
            Cue::Hangup => {
                let mut samples = Vec::new();
                for _ in 0..3 {
                    samples.extend(dual_tone(480.0, 620.0, Duration::from_millis(180)));
                    samples.extend(silence(Duration::from_millis(100)));
                }
                AudioClip::once(encode_wav(&samples, CUE_SAMPLE_RATE))
            }
        }
    }
}

fn dual_tone(f1: f32, f2: f32, length: Duration) -> Vec<f32> {
    let n = (length.as_secs_f32() * CUE_SAMPLE_RATE as f32) as usize;
    let rate = CUE_SAMPLE_RATE as f32;
    (0..n)
        .map(|i| {
            let t = i as f32 / rate;
            0.15 * ((2.0 * PI * f1 * t).sin() + (2.0 * PI * f2 * t).sin())
        })
        .collect()
}

fn silence(length: Duration) -> impl Iterator<Item = f32> {
    let n = (length.as_secs_f32() * CUE_SAMPLE_RATE as f32) as usize;
    std::iter::repeat(0.0).take(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.buffer_size, 480);
    }

    #[test]
    fn wav_header_describes_mono_pcm16() {
        let wav = encode_wav(&[0.0, 1.0, -1.0], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(i16::from_le_bytes([wav[46], wav[47]]), 32767);
    }

    #[test]
    fn ring_loops_and_hangup_fits_before_landing() {
        let ring = Cue::Ring.clip();
        assert!(ring.looped);
        let hangup = Cue::Hangup.clip();
        assert!(!hangup.looped);
        let secs = (hangup.bytes.len() - 44) as f32 / 2.0 / CUE_SAMPLE_RATE as f32;
        assert!(secs < 1.0, "hangup cue lasts {secs}s");
    }

    #[test]
    fn test_list_devices() {
        // Might fail in CI environments without audio devices
        if let Ok(devices) = AudioCapture::list_input_devices() {
            println!("Available input devices: {:?}", devices);
        }
    }
}
