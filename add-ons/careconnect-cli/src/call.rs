//! `careconnect call`: a voice call driven from the terminal.
//!
//! Call progress and the transcript are printed as they happen. While the call is active,
//! `end` opens the summary, and anything else is sent to the doctor as typed input. At the
//! summary, `save`, `discard` or `resume`.

use crate::wiring;
use anyhow::Result;
use careconnect_core::{AppConfig, Message, Role};
use careconnect_voice::{spawn_call, CallHandle, CallParts, CallState, CallUpdate, VoiceConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const CONSENT_DISCLAIMER: &str = "I am an AI, not a real doctor. My advice is for informational \
purposes only. In case of a medical emergency, please call local emergency services immediately.";

pub async fn run(config: AppConfig, skip_consent: bool, report_dir: PathBuf) -> Result<()> {
    let credentials = wiring::open_credentials(&config)?;
    let session = wiring::new_session(&config, credentials.clone());
    if !session.has_credential() {
        println!("No Gemini API key stored; run `careconnect set-key gemini <KEY>` for real replies.");
    }

    let tiers = wiring::synthesis_tiers(&config, &credentials).await;
    let mut handle = spawn_call(CallParts {
        session,
        recognizer: wiring::recognizer(&config, &credentials),
        tiers,
        voice: VoiceConfig::from_config(&config.synthesis),
        timings: config.call.clone(),
    });
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    handle.acknowledge();
    println!("\n⚠️  {}\n", CONSENT_DISCLAIMER);
    if !skip_consent {
        println!("Press Enter to agree and start the call, or type `quit`.");
        match lines.next_line().await? {
            Some(line) if line.trim().is_empty() || line.trim() == "start" => {}
            _ => {
                println!("Call cancelled.");
                return Ok(());
            }
        }
    }
    handle.start();

    let mut interrupts = interrupts()?;
    let mut seeded = handle.snapshot().messages;
    let mut stdin_open = true;
    let mut degraded = false;
    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(CallUpdate::StateChanged(state)) => {
                    if state == CallState::Active {
                        // Seeded before the call started; shown once on connect.
                        seeded.drain(..).for_each(|m| print_message(&m));
                    }
                    announce(&handle, state);
                }
                Some(CallUpdate::MessageAdded(message)) => print_message(&message),
                Some(CallUpdate::ReportReady(report)) => {
                    println!("\n{}", report.to_plain_text());
                    println!("Type `save` to keep this report, `discard` to hang up, or `resume`.");
                }
                Some(CallUpdate::SaveReport(report)) => {
                    let path = wiring::save_report(&report_dir, &report)?;
                    println!("📄 Report saved to {}", path.display());
                }
                Some(CallUpdate::Closed) | None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => dispatch(&handle, line.trim()),
                None => {
                    stdin_open = false;
                    handle.hangup();
                }
            },
            Some(()) = interrupts.recv() => {
                info!("CTRL-C received; ending call");
                match handle.snapshot().state {
                    CallState::Active => handle.end_call(),
                    _ => handle.hangup(),
                }
            }
        }

        let snapshot = handle.snapshot();
        if snapshot.speech_degraded && !degraded {
            println!("🔇 Speech keeps failing; follow the transcript here and type if needed.");
        }
        degraded = snapshot.speech_degraded;
    }

    let session = handle.join().await?;
    info!(messages = session.messages().len(), "Call finished");
    Ok(())
}

/// One Ctrl-C listener for the whole call, so interrupts between polls are not lost.
#[cfg(unix)]
fn interrupts() -> std::io::Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
}

#[cfg(windows)]
fn interrupts() -> std::io::Result<tokio::signal::windows::CtrlC> {
    tokio::signal::windows::ctrl_c()
}

fn dispatch(handle: &CallHandle, line: &str) {
    match (handle.snapshot().state, line) {
        (_, "") => {}
        (_, "hangup" | "quit") => handle.hangup(),
        (CallState::Active, "end") => handle.end_call(),
        (CallState::Ending, "save") => handle.save_and_close(),
        (CallState::Ending, "discard") => handle.discard_and_close(),
        (CallState::Ending, "resume") => handle.resume(),
        (CallState::Active, text) => handle.submit_text(text),
        (state, _) => println!("(call is {})", state),
    }
}

fn announce(handle: &CallHandle, state: CallState) {
    match state {
        CallState::Connecting => println!("📞 Ringing..."),
        CallState::Active => {
            if handle.snapshot().capture_supported {
                println!("✅ Connected. Speak when the doctor finishes; type `end` to finish.");
            } else {
                println!("✅ Connected. Speech capture is unavailable, so type your messages; `end` to finish.");
            }
        }
        CallState::Ended => println!("📴 Call ended."),
        CallState::Idle | CallState::Consenting | CallState::Ending => {}
    }
}

fn print_message(message: &Message) {
    match message.role {
        Role::Assistant => println!("🩺 Doctor: {}", message.text),
        Role::User => println!("🧑 You: {}", message.text),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn send_interrupt() {
        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn every_interrupt_reaches_the_call_loop() {
        let mut interrupts = interrupts().unwrap();

        send_interrupt();
        let first = tokio::time::timeout(Duration::from_secs(5), interrupts.recv()).await;
        assert_eq!(first.unwrap(), Some(()));

        // Arrives while nobody is polling.
        send_interrupt();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::time::timeout(Duration::from_secs(5), interrupts.recv()).await;
        assert_eq!(second.unwrap(), Some(()));
    }
}
