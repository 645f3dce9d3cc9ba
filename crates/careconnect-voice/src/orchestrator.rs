//! Turn-taking orchestrator for a voice call.
//!
//! A pure state machine: [`CallOrchestrator::handle`] consumes one [`CallEvent`] and returns
//! the [`Command`]s the runtime must execute. It owns the call state, the turn signal and the
//! dialogue session; it never touches devices, the network or the clock.
//!
//! Timers are armed with a fresh [`TimerTicket`]. A firing whose ticket is not the one
//! currently armed for its kind is stale and ignored, so a timer can never act after the
//! state that armed it was left.
//!
//! Speaking and listening are tracked from the moment the command is issued, not from the
//! adapter's `Started` report, so auto-listen cannot slip in while remote synthesis is
//! still fetching audio.

use crate::audio::Cue;
use crate::call::CallState;
use crate::capture::{CaptureEvent, CaptureId, CaptureOutcome};
use crate::synthesis::{SpeechOutcome, SynthesisEvent, UtteranceId};
use crate::turn::TurnSignal;
use careconnect_core::{
    CallTimings, DialogueError, DialogueRequest, DialogueSession, Message, SbarReport,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimerKind {
    /// Ringing → active.
    Connect,
    /// Idle wait before auto-listen re-arms.
    Quiescence,
    /// Call duration counter.
    DurationTick,
    /// Hangup cue → back to the landing screen.
    Landing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Disclaimer shown.
    Acknowledge,
    /// Consent given; place the call.
    Start,
    EndCall,
    Resume,
    SaveAndClose,
    DiscardAndClose,
    Hangup,
    /// Typed user input while the call is active.
    SubmitText(String),
    TimerFired { kind: TimerKind, ticket: TimerTicket },
    Capture(CaptureEvent),
    Synthesis(SynthesisEvent),
    Reply(Result<String, DialogueError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PlayCue(Cue),
    StopCue,
    StartListening(CaptureId),
    CancelListening,
    Speak { id: UtteranceId, text: String },
    CancelSpeech,
    RequestReply(DialogueRequest),
    ArmTimer {
        kind: TimerKind,
        ticket: TimerTicket,
        after: Duration,
    },
    DisarmTimer(TimerKind),
    PresentReport(SbarReport),
    SaveReport(SbarReport),
    ReturnToLanding,
}

/// Published view of the call.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub signal: TurnSignal,
    pub elapsed: Duration,
    pub messages: Vec<Message>,
    pub error: Option<String>,
    pub speech_degraded: bool,
    pub capture_supported: bool,
}

pub struct CallOrchestrator {
    state: CallState,
    signal: TurnSignal,
    session: DialogueSession,
    timings: CallTimings,
    capture_supported: bool,

    greeted: bool,
    observed: usize,
    pending_speech: Option<String>,
    speaking: Option<UtteranceId>,
    listening: Option<CaptureId>,
    next_utterance: u64,
    next_capture: u64,

    next_ticket: u64,
    timers: HashMap<TimerKind, TimerTicket>,

    elapsed: Duration,
    failures: u32,
    speech_degraded: bool,
    report: Option<SbarReport>,
    closed: bool,

    out: Vec<Command>,
}

impl CallOrchestrator {
    /// `capture_supported` is decided once; without it the call runs in text mode and
    /// auto-listen never arms.
    pub fn new(session: DialogueSession, timings: CallTimings, capture_supported: bool) -> Self {
        let observed = session.messages().len();
        Self {
            state: CallState::Idle,
            signal: TurnSignal::default(),
            session,
            timings,
            capture_supported,
            greeted: false,
            observed,
            pending_speech: None,
            speaking: None,
            listening: None,
            next_utterance: 0,
            next_capture: 0,
            next_ticket: 0,
            timers: HashMap::new(),
            elapsed: Duration::ZERO,
            failures: 0,
            speech_degraded: false,
            report: None,
            closed: false,
            out: Vec::new(),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn signal(&self) -> TurnSignal {
        self.signal
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn session(&self) -> &DialogueSession {
        &self.session
    }

    pub fn into_session(self) -> DialogueSession {
        self.session
    }

    pub fn report(&self) -> Option<&SbarReport> {
        self.report.as_ref()
    }

    pub fn speech_degraded(&self) -> bool {
        self.speech_degraded
    }

    /// The landing timer has fired; the runtime may stop.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state,
            signal: self.signal,
            elapsed: self.elapsed,
            messages: self.session.messages().to_vec(),
            error: self.session.error().map(str::to_string),
            speech_degraded: self.speech_degraded,
            capture_supported: self.capture_supported,
        }
    }

    /// Process one event to completion.
    pub fn handle(&mut self, event: CallEvent) -> Vec<Command> {
        match event {
            CallEvent::Acknowledge => {
                if self.state == CallState::Idle {
                    self.transition(CallState::Consenting);
                }
            }
            CallEvent::Start => {
                if matches!(self.state, CallState::Idle | CallState::Consenting) {
                    self.transition(CallState::Connecting);
                    self.emit(Command::PlayCue(Cue::Ring));
                    self.arm(TimerKind::Connect, self.timings.ring_delay());
                }
            }
            CallEvent::TimerFired { kind, ticket } => {
                if self.timers.get(&kind) == Some(&ticket) {
                    self.timers.remove(&kind);
                    self.on_timer(kind);
                } else {
                    debug!(target: "careconnect::call", ?kind, ticket = ticket.0, "Stale timer ignored");
                }
            }
            CallEvent::EndCall => {
                if self.state == CallState::Active {
                    self.end_call();
                }
            }
            CallEvent::Resume => {
                if self.state == CallState::Ending {
                    self.resume();
                }
            }
            CallEvent::SaveAndClose => {
                if self.state == CallState::Ending {
                    if let Some(report) = self.report.clone() {
                        self.emit(Command::SaveReport(report));
                    }
                    self.hang_up();
                }
            }
            CallEvent::DiscardAndClose => {
                if self.state == CallState::Ending {
                    self.hang_up();
                }
            }
            CallEvent::Hangup => {
                if matches!(
                    self.state,
                    CallState::Connecting | CallState::Active | CallState::Ending
                ) {
                    self.hang_up();
                }
            }
            CallEvent::SubmitText(text) => {
                if self.state == CallState::Active {
                    self.submit_typed(&text);
                }
            }
            CallEvent::Capture(event) => self.on_capture(event),
            CallEvent::Synthesis(event) => self.on_synthesis(event),
            CallEvent::Reply(outcome) => self.on_reply(outcome),
        }
        debug_assert!(!(self.signal.is_listening() && self.signal.is_speaking()));
        std::mem::take(&mut self.out)
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Connect => {
                if self.state == CallState::Connecting {
                    self.connect();
                }
            }
            TimerKind::DurationTick => {
                if self.state == CallState::Active {
                    self.elapsed += self.timings.tick();
                    self.arm(TimerKind::DurationTick, self.timings.tick());
                }
            }
            TimerKind::Quiescence => {
                if self.state == CallState::Active && self.signal.is_idle() {
                    self.start_listening();
                }
            }
            TimerKind::Landing => {
                if self.state == CallState::Ended && !self.closed {
                    self.closed = true;
                    self.emit(Command::ReturnToLanding);
                }
            }
        }
    }

    fn connect(&mut self) {
        self.transition(CallState::Active);
        self.emit(Command::StopCue);
        self.arm(TimerKind::DurationTick, self.timings.tick());

        if !self.greeted {
            self.greeted = true;
            if let Some(last) = self.session.last_message().filter(|m| m.is_assistant()) {
                let text = last.text.clone();
                self.speak(text);
            }
        }
        self.observed = self.session.messages().len();
        self.auto_listen();
    }

    fn end_call(&mut self) {
        self.transition(CallState::Ending);
        self.cancel_speech();
        self.cancel_listening();
        self.pending_speech = None;
        self.disarm(TimerKind::Quiescence);
        self.disarm(TimerKind::DurationTick);

        let report = SbarReport::generate(self.session.messages(), self.elapsed);
        self.report = Some(report.clone());
        self.emit(Command::PresentReport(report));
    }

    fn resume(&mut self) {
        self.transition(CallState::Active);
        self.report = None;
        self.arm(TimerKind::DurationTick, self.timings.tick());
        if self.capture_supported && self.signal.is_idle() {
            self.start_listening();
        }
    }

    fn hang_up(&mut self) {
        self.cancel_speech();
        self.cancel_listening();
        self.pending_speech = None;
        for kind in [TimerKind::Connect, TimerKind::Quiescence, TimerKind::DurationTick] {
            self.disarm(kind);
        }
        self.transition(CallState::Ended);
        self.emit(Command::PlayCue(Cue::Hangup));
        self.arm(TimerKind::Landing, self.timings.hangup_delay());
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        let (id, outcome) = match event {
            CaptureEvent::Started { id } => {
                debug!(target: "careconnect::call", capture = id.0, "Listening started");
                return;
            }
            CaptureEvent::Finished { id, outcome } => (id, outcome),
        };
        if self.listening != Some(id) {
            debug!(target: "careconnect::call", capture = id.0, "Stale capture result ignored");
            return;
        }
        self.listening = None;
        self.signal.stop_listening();

        match outcome {
            CaptureOutcome::Transcript(text) => {
                self.record_success();
                let text = text.trim();
                if !text.is_empty() && self.state == CallState::Active {
                    info!(target: "careconnect::call", chars = text.len(), "User turn captured");
                    self.submit(text);
                }
            }
            CaptureOutcome::NoSpeech => {
                debug!(target: "careconnect::call", "No speech; listening again");
            }
            CaptureOutcome::Failed(e) => self.record_failure("capture", &e),
            CaptureOutcome::Cancelled => {}
        }

        if self.state == CallState::Active {
            if let Some(text) = self.pending_speech.take() {
                self.speak(text);
            }
        }
        self.auto_listen();
    }

    fn on_synthesis(&mut self, event: SynthesisEvent) {
        let (id, outcome) = match event {
            SynthesisEvent::Started { id } => {
                debug!(target: "careconnect::call", utterance = id.0, "Speaking");
                return;
            }
            SynthesisEvent::Finished { id, outcome } => (id, outcome),
        };
        if self.speaking != Some(id) {
            return;
        }
        self.speaking = None;
        self.signal.stop_speaking();

        match outcome {
            SpeechOutcome::Completed => self.record_success(),
            SpeechOutcome::Failed(e) => self.record_failure("synthesis", &e),
            SpeechOutcome::Unsupported => self.record_failure("synthesis", "no synthesis available"),
            SpeechOutcome::Cancelled => {}
        }
        self.auto_listen();
    }

    fn on_reply(&mut self, outcome: Result<String, DialogueError>) {
        if !self.session.is_loading() {
            warn!(target: "careconnect::call", "Reply without an outstanding request ignored");
            return;
        }
        self.session.finish_turn(outcome);
        self.signal.set_loading(false);
        self.observe_history();
        self.auto_listen();
    }

    fn submit_typed(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.signal.is_loading() {
            debug!(target: "careconnect::call", "Reply pending; typed input ignored");
            return;
        }
        self.cancel_listening();
        self.cancel_speech();
        self.pending_speech = None;
        self.submit(text);
        self.auto_listen();
    }

    fn submit(&mut self, text: &str) {
        self.disarm(TimerKind::Quiescence);
        if let Some(request) = self.session.begin_turn(text) {
            self.signal.set_loading(true);
            self.emit(Command::RequestReply(request));
        }
        self.observe_history();
    }

    /// Speak any assistant message appended since the last look. Messages that arrive
    /// outside `active` are marked seen and never spoken.
    fn observe_history(&mut self) {
        let len = self.session.messages().len();
        if len <= self.observed {
            return;
        }
        self.observed = len;
        if self.state != CallState::Active {
            return;
        }
        if let Some(last) = self.session.last_message().filter(|m| m.is_assistant()) {
            let text = last.text.clone();
            self.speak(text);
        }
    }

    fn speak(&mut self, text: String) {
        self.disarm(TimerKind::Quiescence);
        if self.listening.is_some() {
            self.pending_speech = Some(text);
            return;
        }
        let id = UtteranceId(self.next_utterance);
        self.next_utterance += 1;
        self.speaking = Some(id);
        self.signal.start_speaking();
        self.emit(Command::Speak { id, text });
    }

    fn start_listening(&mut self) {
        if !self.capture_supported || !self.signal.start_listening() {
            return;
        }
        let id = CaptureId(self.next_capture);
        self.next_capture += 1;
        self.listening = Some(id);
        self.emit(Command::StartListening(id));
    }

    fn cancel_speech(&mut self) {
        if self.speaking.take().is_some() {
            self.signal.stop_speaking();
            self.emit(Command::CancelSpeech);
        }
    }

    fn cancel_listening(&mut self) {
        if self.listening.take().is_some() {
            self.signal.stop_listening();
            self.emit(Command::CancelListening);
        }
    }

    fn auto_listen(&mut self) {
        if self.state == CallState::Active
            && self.capture_supported
            && self.signal.is_idle()
            && self.pending_speech.is_none()
        {
            self.arm(TimerKind::Quiescence, self.timings.quiescence());
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.speech_degraded = false;
    }

    fn record_failure(&mut self, source: &str, error: &str) {
        self.failures += 1;
        warn!(target: "careconnect::call", source, failures = self.failures, "Speech failure absorbed: {}", error);
        if !self.speech_degraded && self.failures >= self.timings.degraded_after_failures {
            self.speech_degraded = true;
            warn!(target: "careconnect::call", "Speech degraded after {} consecutive failures", self.failures);
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) {
        let ticket = TimerTicket(self.next_ticket);
        self.next_ticket += 1;
        self.timers.insert(kind, ticket);
        self.emit(Command::ArmTimer {
            kind,
            ticket,
            after,
        });
    }

    fn disarm(&mut self, kind: TimerKind) {
        if self.timers.remove(&kind).is_some() {
            self.emit(Command::DisarmTimer(kind));
        }
    }

    fn transition(&mut self, next: CallState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal call transition {} -> {}",
            self.state,
            next
        );
        info!(target: "careconnect::call", from = %self.state, to = %next, "Call state");
        self.state = next;
    }

    fn emit(&mut self, command: Command) {
        self.out.push(command);
    }
}
