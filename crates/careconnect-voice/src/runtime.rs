//! Async call runtime.
//!
//! One tokio task owns the [`CallOrchestrator`], the capture and synthesis adapters and the
//! timer tasks. User actions, adapter completions, timer firings and dialogue replies all
//! arrive on one unbounded channel and are processed to completion one at a time.

use crate::audio::AudioOutput;
use crate::call::CallState;
use crate::capture::{CaptureEvent, CaptureOutcome, Recognizer, SpeechCapture};
use crate::error::{VoiceError, VoiceResult};
use crate::orchestrator::{CallEvent, CallOrchestrator, CallSnapshot, Command, TimerKind};
use crate::synthesis::{SpeechSynthesis, SynthesisEvent, SynthesisTiers, VoiceConfig};
use careconnect_core::{CallTimings, DialogueBackend, DialogueSession, Message, SbarReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a call needs, assembled by the caller.
pub struct CallParts {
    pub session: DialogueSession,
    pub recognizer: Arc<dyn Recognizer>,
    pub tiers: SynthesisTiers,
    pub voice: VoiceConfig,
    pub timings: CallTimings,
}

/// Notifications for the front-end, in the order they happened.
#[derive(Debug, Clone)]
pub enum CallUpdate {
    StateChanged(CallState),
    MessageAdded(Message),
    /// The call is ending; offer save or discard.
    ReportReady(SbarReport),
    /// The user chose to keep the report.
    SaveReport(SbarReport),
    /// Hangup cue done; return to the landing screen.
    Closed,
}

/// Front-end side of a running call.
pub struct CallHandle {
    events: mpsc::UnboundedSender<CallEvent>,
    snapshot: watch::Receiver<CallSnapshot>,
    updates: mpsc::UnboundedReceiver<CallUpdate>,
    task: JoinHandle<DialogueSession>,
}

impl CallHandle {
    pub fn acknowledge(&self) {
        self.send(CallEvent::Acknowledge);
    }

    pub fn start(&self) {
        self.send(CallEvent::Start);
    }

    pub fn end_call(&self) {
        self.send(CallEvent::EndCall);
    }

    pub fn resume(&self) {
        self.send(CallEvent::Resume);
    }

    pub fn save_and_close(&self) {
        self.send(CallEvent::SaveAndClose);
    }

    pub fn discard_and_close(&self) {
        self.send(CallEvent::DiscardAndClose);
    }

    pub fn hangup(&self) {
        self.send(CallEvent::Hangup);
    }

    pub fn submit_text(&self, text: impl Into<String>) {
        self.send(CallEvent::SubmitText(text.into()));
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    /// `None` once the call task has exited and every update was drained.
    pub async fn next_update(&mut self) -> Option<CallUpdate> {
        self.updates.recv().await
    }

    /// Wait for the call to close and take the conversation back.
    pub async fn join(self) -> VoiceResult<DialogueSession> {
        self.task
            .await
            .map_err(|e| VoiceError::Runtime(e.to_string()))
    }

    fn send(&self, event: CallEvent) {
        if self.events.send(event).is_err() {
            debug!(target: "careconnect::call", "Call already closed");
        }
    }
}

/// Start the call task. The call sits in `idle` until [`CallHandle::start`].
pub fn spawn_call(parts: CallParts) -> CallHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let capture_listener = {
        let tx = events_tx.clone();
        Arc::new(move |event: CaptureEvent| {
            let _ = tx.send(CallEvent::Capture(event));
        })
    };
    let synthesis_listener = {
        let tx = events_tx.clone();
        Arc::new(move |event: SynthesisEvent| {
            let _ = tx.send(CallEvent::Synthesis(event));
        })
    };

    let capture = SpeechCapture::new(parts.recognizer, capture_listener);
    let output = Arc::clone(&parts.tiers.output);
    let synthesis = SpeechSynthesis::new(parts.tiers, parts.voice, synthesis_listener);
    let backend = parts.session.backend();
    let orchestrator = CallOrchestrator::new(parts.session, parts.timings, capture.is_supported());

    info!(
        target: "careconnect::call",
        capture = capture.is_supported(),
        synthesis = synthesis.is_supported(),
        "Call ready"
    );

    let (snapshot_tx, snapshot_rx) = watch::channel(orchestrator.snapshot());
    let runtime = CallRuntime {
        state: orchestrator.state(),
        seen: orchestrator.session().messages().len(),
        orchestrator,
        capture,
        synthesis,
        output,
        backend,
        events: events_tx.clone(),
        timers: HashMap::new(),
        reply: None,
        snapshot: snapshot_tx,
        updates: updates_tx,
    };
    let task = tokio::spawn(runtime.run(events_rx));

    CallHandle {
        events: events_tx,
        snapshot: snapshot_rx,
        updates: updates_rx,
        task,
    }
}

struct CallRuntime {
    orchestrator: CallOrchestrator,
    capture: SpeechCapture,
    synthesis: SpeechSynthesis,
    output: Arc<dyn AudioOutput>,
    backend: Arc<dyn DialogueBackend>,
    events: mpsc::UnboundedSender<CallEvent>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    reply: Option<JoinHandle<()>>,
    snapshot: watch::Sender<CallSnapshot>,
    updates: mpsc::UnboundedSender<CallUpdate>,
    state: CallState,
    seen: usize,
}

impl CallRuntime {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<CallEvent>) -> DialogueSession {
        while let Some(event) = events.recv().await {
            for command in self.orchestrator.handle(event) {
                self.execute(command);
            }
            self.publish();
            if self.orchestrator.is_closed() {
                break;
            }
        }
        self.shutdown();
        info!(target: "careconnect::call", "Call closed");
        self.orchestrator.into_session()
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::PlayCue(cue) => {
                // Completion is irrelevant; the next clip or stop replaces it.
                drop(self.output.play(cue.clip()));
            }
            Command::StopCue => self.output.stop(),
            Command::StartListening(id) => {
                if !self.capture.start(id) {
                    let _ = self.events.send(CallEvent::Capture(CaptureEvent::Finished {
                        id,
                        outcome: CaptureOutcome::Failed("speech capture unsupported".to_string()),
                    }));
                }
            }
            Command::CancelListening => self.capture.cancel(),
            Command::Speak { id, text } => self.synthesis.speak(id, &text, None),
            Command::CancelSpeech => self.synthesis.cancel(),
            Command::RequestReply(request) => {
                let backend = Arc::clone(&self.backend);
                let tx = self.events.clone();
                self.reply = Some(tokio::spawn(async move {
                    let outcome = backend.generate(&request).await;
                    let _ = tx.send(CallEvent::Reply(outcome));
                }));
            }
            Command::ArmTimer {
                kind,
                ticket,
                after,
            } => {
                let tx = self.events.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(CallEvent::TimerFired { kind, ticket });
                });
                if let Some(old) = self.timers.insert(kind, timer) {
                    old.abort();
                }
            }
            Command::DisarmTimer(kind) => {
                if let Some(timer) = self.timers.remove(&kind) {
                    timer.abort();
                }
            }
            Command::PresentReport(report) => self.notify(CallUpdate::ReportReady(report)),
            Command::SaveReport(report) => self.notify(CallUpdate::SaveReport(report)),
            Command::ReturnToLanding => self.notify(CallUpdate::Closed),
        }
    }

    fn publish(&mut self) {
        let state = self.orchestrator.state();
        if state != self.state {
            self.state = state;
            self.notify(CallUpdate::StateChanged(state));
        }
        let messages = self.orchestrator.session().messages();
        if messages.len() > self.seen {
            let added: Vec<Message> = messages[self.seen..].to_vec();
            self.seen = messages.len();
            for message in added {
                self.notify(CallUpdate::MessageAdded(message));
            }
        }
        self.snapshot.send_replace(self.orchestrator.snapshot());
    }

    fn notify(&self, update: CallUpdate) {
        let _ = self.updates.send(update);
    }

    fn shutdown(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        if let Some(reply) = self.reply.take() {
            reply.abort();
        }
        self.capture.cancel();
        self.synthesis.cancel();
    }
}
