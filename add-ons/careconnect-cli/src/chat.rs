//! `careconnect chat`: typed consultation, optionally read aloud.
//!
//! Commands: `/report` saves the SBAR report, `/key <KEY>` stores a Gemini key, `/quit` exits.
//! With `--listen`, an empty line dictates the next message through the microphone.

use crate::wiring;
use anyhow::Result;
use careconnect_core::{AppConfig, SbarReport};
use careconnect_voice::{
    CaptureEvent, CaptureId, CaptureListener, CaptureOutcome, Recognizer, SpeechCapture,
    SpeechSynthesis, SynthesisEvent, SynthesisListener, UtteranceId, VoiceConfig,
};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Reads assistant messages aloud; each new one preempts the last.
struct Reader {
    synthesis: SpeechSynthesis,
    next: u64,
}

impl Reader {
    fn say(&mut self, text: &str) {
        let id = UtteranceId(self.next);
        self.next += 1;
        self.synthesis.speak(id, text, None);
    }
}

/// Single-utterance microphone dictation.
struct Dictation {
    capture: SpeechCapture,
    events: mpsc::UnboundedReceiver<CaptureEvent>,
    next: u64,
}

impl Dictation {
    fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let listener: CaptureListener = Arc::new(move |event: CaptureEvent| {
            let _ = tx.send(event);
        });
        Self {
            capture: SpeechCapture::new(recognizer, listener),
            events,
            next: 0,
        }
    }

    fn is_supported(&self) -> bool {
        self.capture.is_supported()
    }

    /// Listen until one utterance is transcribed or `stop` resolves. `None` when nothing
    /// usable was heard.
    async fn listen(&mut self, stop: impl Future<Output = ()>) -> Option<String> {
        let id = CaptureId(self.next);
        self.next += 1;
        if !self.capture.start(id) {
            return None;
        }

        tokio::pin!(stop);
        let mut stopping = false;
        loop {
            tokio::select! {
                event = self.events.recv() => match event? {
                    CaptureEvent::Finished { id: finished, outcome } if finished == id => {
                        return match outcome {
                            CaptureOutcome::Transcript(text) if !text.trim().is_empty() => {
                                Some(text.trim().to_string())
                            }
                            other => {
                                debug!(?other, "Dictation produced no text");
                                None
                            }
                        };
                    }
                    _ => {}
                },
                _ = &mut stop, if !stopping => {
                    stopping = true;
                    self.capture.cancel();
                }
            }
        }
    }
}

pub async fn run(config: AppConfig, speak: bool, listen: bool, report_dir: PathBuf) -> Result<()> {
    let credentials = wiring::open_credentials(&config)?;
    let mut session = wiring::new_session(&config, credentials.clone());
    let backend = session.backend();

    let mut reader = if speak {
        let listener: SynthesisListener = Arc::new(|event: SynthesisEvent| {
            debug!(?event, "Read-aloud");
        });
        Some(Reader {
            synthesis: SpeechSynthesis::new(
                wiring::synthesis_tiers(&config, &credentials).await,
                VoiceConfig::from_config(&config.synthesis),
                listener,
            ),
            next: 0,
        })
    } else {
        None
    };

    let mut dictation = listen
        .then(|| Dictation::new(wiring::recognizer(&config, &credentials)))
        .filter(|d| {
            if !d.is_supported() {
                println!("(Dictation unavailable: no microphone or transcription key.)");
            }
            d.is_supported()
        });

    if let Some(greeting) = session.last_message() {
        println!("🩺 Doctor: {}", greeting.text);
        if let Some(reader) = reader.as_mut() {
            reader.say(&greeting.text);
        }
    }
    if !session.has_credential() {
        println!("(No Gemini API key yet: type `/key <KEY>` to add one.)");
    }
    if dictation.is_some() {
        println!("(Press Enter on an empty line to dictate.)");
    }

    let started = Instant::now();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut line = line.trim().to_string();

        if line.is_empty() {
            let Some(dictation) = dictation.as_mut() else {
                continue;
            };
            if let Some(reader) = reader.as_mut() {
                reader.synthesis.cancel();
            }
            println!("🎙️  Listening... (Enter to stop)");
            let stop = async {
                let _ = lines.next_line().await;
            };
            match dictation.listen(stop).await {
                Some(text) => {
                    println!("🧑 You: {}", text);
                    line = text;
                }
                None => {
                    println!("(Nothing heard.)");
                    continue;
                }
            }
        }

        match line.as_str() {
            "/quit" | "/exit" => break,
            "/report" => {
                let report = SbarReport::generate(session.messages(), started.elapsed());
                let path = wiring::save_report(&report_dir, &report)?;
                println!("📄 Report saved to {}", path.display());
                continue;
            }
            _ => {}
        }
        if let Some(key) = line.strip_prefix("/key ") {
            session.save_credential(key)?;
            println!("API key saved.");
            continue;
        }

        if let Some(reader) = reader.as_mut() {
            reader.synthesis.cancel();
        }
        let failed = match session.begin_turn(&line) {
            Some(request) => {
                let outcome = backend.generate(&request).await;
                let failed = outcome.is_err();
                session.finish_turn(outcome);
                failed
            }
            None => true,
        };
        if let Some(error) = session.error().filter(|_| failed) {
            eprintln!("⚠️  {}", error);
        }
        if let Some(reply) = session.last_message() {
            println!("🩺 Doctor: {}", reply.text);
            if let Some(reader) = reader.as_mut() {
                reader.say(&reply.text);
            }
        }
    }

    if let Some(reader) = reader.as_mut() {
        reader.synthesis.cancel();
    }
    if let Some(dictation) = dictation.as_mut() {
        dictation.capture.cancel();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use careconnect_voice::VoiceResult;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Hears `line` after a short pause; `None` waits until cancelled.
    struct Microphone {
        line: Option<&'static str>,
        supported: bool,
    }

    #[async_trait]
    impl Recognizer for Microphone {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn recognize(&self, cancel: CancellationToken) -> VoiceResult<Option<String>> {
            match self.line {
                Some(line) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Some(line.to_string()))
                }
                None => {
                    cancel.cancelled().await;
                    Ok(None)
                }
            }
        }
    }

    fn dictation(line: Option<&'static str>, supported: bool) -> Dictation {
        Dictation::new(Arc::new(Microphone { line, supported }))
    }

    #[tokio::test]
    async fn dictated_utterance_becomes_the_message() {
        let mut d = dictation(Some("  my throat hurts "), true);
        let heard = d.listen(std::future::pending()).await;
        assert_eq!(heard.as_deref(), Some("my throat hurts"));

        // A second session gets a fresh id and still resolves.
        let heard = d.listen(std::future::pending()).await;
        assert_eq!(heard.as_deref(), Some("my throat hurts"));
    }

    #[tokio::test]
    async fn stopping_dictation_yields_nothing() {
        let mut d = dictation(None, true);
        let heard = tokio::time::timeout(Duration::from_secs(5), d.listen(async {})).await;
        assert_eq!(heard.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_transcript_is_not_sent() {
        let mut d = dictation(Some("   "), true);
        assert_eq!(d.listen(std::future::pending()).await, None);
    }

    #[tokio::test]
    async fn unsupported_microphone_returns_immediately() {
        let mut d = dictation(Some("hello"), false);
        assert!(!d.is_supported());
        assert_eq!(d.listen(std::future::pending()).await, None);
    }
}
