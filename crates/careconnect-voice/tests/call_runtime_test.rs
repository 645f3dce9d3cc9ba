//! Integration tests for the call runtime on a paused clock.
//!
//! Verifies that:
//! 1. Greeting → auto-listen → transcript → reply spoken → auto-listen re-arms.
//! 2. Ending while a reply is pending never speaks the reply; resume listens again.
//! 3. Without speech capture the call runs on typed input.
//! 4. No timer, capture or speech fires after the call has closed.

use async_trait::async_trait;
use careconnect_core::{
    CallTimings, CredentialKind, DialogueBackend, DialogueConfig, DialogueError,
    DialogueRequest, DialogueSession, MemoryCredentialStore, Role,
};
use careconnect_voice::{
    spawn_call, AudioClip, AudioOutput, CallHandle, CallParts, CallState, CallUpdate,
    LocalSynthesizer, PlaybackOutcome, Recognizer, SynthesisTiers, Voice, VoiceConfig,
    VoiceResult,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

const GREETING: &str = "Hello! I am your AI Travel Doctor. How can I help you today?";
const REPLY: &str = "Rest and drink plenty of fluids.";

/// Says each scripted line once, then waits silently until cancelled.
struct ScriptedRecognizer {
    supported: bool,
    script: Mutex<VecDeque<&'static str>>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    fn new(lines: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            supported: true,
            script: Mutex::new(lines.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn absent() -> Arc<Self> {
        Arc::new(Self {
            supported: false,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn recognize(&self, cancel: CancellationToken) -> VoiceResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let line = self.script.lock().unwrap().pop_front();
        match line {
            Some(text) => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Some(text.to_string()))
            }
            None => {
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }
}

struct Doctor {
    delay: Duration,
    requests: Mutex<Vec<DialogueRequest>>,
}

impl Doctor {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DialogueBackend for Doctor {
    async fn generate(&self, request: &DialogueRequest) -> Result<String, DialogueError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.delay).await;
        Ok(REPLY.to_string())
    }
}

/// Local tier that records what it was asked to say.
#[derive(Default)]
struct RecordingVoice {
    said: Mutex<Vec<String>>,
}

#[async_trait]
impl LocalSynthesizer for RecordingVoice {
    fn is_supported(&self) -> bool {
        true
    }

    async fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    async fn synthesize(&self, text: &str, _: Option<&Voice>, _: f32, _: f32) -> VoiceResult<Vec<u8>> {
        self.said.lock().unwrap().push(text.to_string());
        Ok(vec![0; 4])
    }
}

/// Clips last 200 ms; looped clips play until stopped.
struct FakeSpeaker {
    stops: watch::Sender<u64>,
    plays: AtomicUsize,
    looped: AtomicUsize,
}

impl FakeSpeaker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stops: watch::channel(0).0,
            plays: AtomicUsize::new(0),
            looped: AtomicUsize::new(0),
        })
    }
}

impl AudioOutput for FakeSpeaker {
    fn play(&self, clip: AudioClip) -> oneshot::Receiver<PlaybackOutcome> {
        self.stop();
        self.plays.fetch_add(1, Ordering::SeqCst);
        if clip.looped {
            self.looped.fetch_add(1, Ordering::SeqCst);
        }
        let mut stopped = self.stops.subscribe();
        stopped.borrow_and_update();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let length = async {
                if clip.looped {
                    std::future::pending::<()>().await
                } else {
                    tokio::time::sleep(Duration::from_millis(200)).await
                }
            };
            let outcome = tokio::select! {
                _ = stopped.changed() => PlaybackOutcome::Stopped,
                _ = length => PlaybackOutcome::Finished,
            };
            let _ = tx.send(outcome);
        });
        rx
    }

    fn stop(&self) {
        self.stops.send_modify(|g| *g += 1);
    }
}

struct Rig {
    recognizer: Arc<ScriptedRecognizer>,
    doctor: Arc<Doctor>,
    voice: Arc<RecordingVoice>,
    speaker: Arc<FakeSpeaker>,
}

impl Rig {
    fn new(recognizer: Arc<ScriptedRecognizer>, reply_delay: Duration) -> Self {
        Self {
            recognizer,
            doctor: Doctor::new(reply_delay),
            voice: Arc::new(RecordingVoice::default()),
            speaker: FakeSpeaker::new(),
        }
    }

    fn spawn(&self) -> CallHandle {
        let store = Arc::new(MemoryCredentialStore::with(CredentialKind::Gemini, "test-key"));
        let session = DialogueSession::new(self.doctor.clone(), store, &DialogueConfig::default());
        spawn_call(CallParts {
            session,
            recognizer: self.recognizer.clone(),
            tiers: SynthesisTiers {
                remote: Vec::new(),
                local: Some(self.voice.clone()),
                output: self.speaker.clone(),
                preferred_voices: Vec::new(),
            },
            voice: VoiceConfig {
                voice: None,
                pitch: 1.1,
                rate: 0.95,
            },
            timings: CallTimings::default(),
        })
    }

    fn said(&self) -> Vec<String> {
        self.voice.said.lock().unwrap().clone()
    }
}

async fn wait_for_update(handle: &mut CallHandle, pred: impl Fn(&CallUpdate) -> bool) -> CallUpdate {
    loop {
        let update = handle.next_update().await.expect("call closed early");
        if pred(&update) {
            return update;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn voice_turn_round_trip() {
    let rig = Rig::new(ScriptedRecognizer::new(&["I have a fever"]), Duration::from_millis(50));
    let mut handle = rig.spawn();
    let mut snapshots = handle.subscribe();

    handle.acknowledge();
    handle.start();
    drop(
        snapshots
            .wait_for(|s| s.messages.len() == 3 && s.signal.is_listening())
            .await
            .unwrap(),
    );

    assert_eq!(rig.said(), vec![GREETING.to_string(), REPLY.to_string()]);
    assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 2);
    let requests = rig.doctor.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "I have a fever");
    assert_eq!(requests[0].history.len(), 1);
    assert_eq!(rig.speaker.looped.load(Ordering::SeqCst), 1);

    handle.end_call();
    let report = match wait_for_update(&mut handle, |u| matches!(u, CallUpdate::ReportReady(_))).await {
        CallUpdate::ReportReady(report) => report,
        _ => unreachable!(),
    };
    assert_eq!(report.situation, "I have a fever");
    assert_eq!(report.recommendation, REPLY);
    assert_eq!(handle.snapshot().state, CallState::Ending);
    assert!(!handle.snapshot().signal.is_listening());

    handle.discard_and_close();
    wait_for_update(&mut handle, |u| matches!(u, CallUpdate::Closed)).await;
    let session = handle.join().await.unwrap();

    let transcript: Vec<(Role, &str)> = session
        .messages()
        .iter()
        .map(|m| (m.role, m.text.as_str()))
        .collect();
    assert_eq!(
        transcript,
        vec![
            (Role::Assistant, GREETING),
            (Role::User, "I have a fever"),
            (Role::Assistant, REPLY),
        ]
    );

    let plays = rig.speaker.plays.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.speaker.plays.load(Ordering::SeqCst), plays);
    assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(rig.said().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reply_pending_at_end_is_not_spoken() {
    let rig = Rig::new(ScriptedRecognizer::new(&["I feel dizzy"]), Duration::from_secs(5));
    let mut handle = rig.spawn();
    let mut snapshots = handle.subscribe();

    handle.start();
    drop(snapshots.wait_for(|s| s.signal.is_loading()).await.unwrap());

    handle.end_call();
    wait_for_update(&mut handle, |u| matches!(u, CallUpdate::ReportReady(_))).await;
    drop(snapshots.wait_for(|s| s.messages.len() == 3).await.unwrap());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.said(), vec![GREETING.to_string()]);

    handle.resume();
    drop(
        snapshots
            .wait_for(|s| s.state == CallState::Active && s.signal.is_listening())
            .await
            .unwrap(),
    );
    assert_eq!(rig.said(), vec![GREETING.to_string()]);

    handle.hangup();
    wait_for_update(&mut handle, |u| matches!(u, CallUpdate::Closed)).await;
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn typed_turns_without_capture() {
    let rig = Rig::new(ScriptedRecognizer::absent(), Duration::from_millis(50));
    let handle = rig.spawn();
    let mut snapshots = handle.subscribe();

    handle.start();
    drop(
        snapshots
            .wait_for(|s| s.state == CallState::Active && s.signal.is_idle())
            .await
            .unwrap(),
    );
    assert!(!handle.snapshot().capture_supported);

    handle.submit_text("I have a rash");
    drop(
        snapshots
            .wait_for(|s| s.messages.len() == 3 && s.signal.is_idle())
            .await
            .unwrap(),
    );
    assert_eq!(rig.said(), vec![GREETING.to_string(), REPLY.to_string()]);
    assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 0);

    handle.hangup();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn hangup_while_ringing_skips_greeting() {
    let rig = Rig::new(ScriptedRecognizer::new(&["hello"]), Duration::from_millis(50));
    let mut handle = rig.spawn();

    handle.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.hangup();
    wait_for_update(&mut handle, |u| matches!(u, CallUpdate::StateChanged(CallState::Ended))).await;
    wait_for_update(&mut handle, |u| matches!(u, CallUpdate::Closed)).await;
    handle.join().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rig.said().is_empty());
    assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 0);
    // Ring, then the hangup cue.
    assert_eq!(rig.speaker.plays.load(Ordering::SeqCst), 2);
}
