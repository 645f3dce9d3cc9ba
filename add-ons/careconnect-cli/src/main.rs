//! careconnect: terminal front-end for the AI travel doctor.
//!
//! `call` places a hands-free voice call, `chat` runs a typed (or dictated) consultation,
//! `set-key` stores API keys and `voices` shows the local voice catalog.

mod call;
mod chat;
mod wiring;

use anyhow::{Context, Result};
use careconnect_core::{AppConfig, CredentialKind, CredentialStore};
use careconnect_voice::{remote_tiers, select_voice, EspeakSynthesizer, LocalSynthesizer};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "careconnect", version, about = "AI travel doctor: voice triage call and text chat")]
struct Args {
    /// Config file (default: $CARECONNECT_CONFIG or config/careconnect.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place a voice call with the AI doctor
    Call {
        /// Accept the disclaimer without prompting
        #[arg(long)]
        yes: bool,

        /// Where saved reports are written
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },
    /// Typed consultation
    Chat {
        /// Read replies aloud
        #[arg(long)]
        speak: bool,

        /// Dictate messages through the microphone (Enter on an empty line)
        #[arg(long)]
        listen: bool,

        /// Where `/report` writes the SBAR report
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },
    /// Store an API key (gemini | elevenlabs | stt)
    SetKey { kind: CredentialKind, value: String },
    /// List local voices and the one a call would use
    Voices,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[careconnect] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    }
    .context("loading configuration")?;

    match args.command {
        Command::Call { yes, report_dir } => call::run(config, yes, report_dir).await,
        Command::Chat {
            speak,
            listen,
            report_dir,
        } => chat::run(config, speak, listen, report_dir).await,
        Command::SetKey { kind, value } => set_key(&config, kind, &value),
        Command::Voices => voices(&config).await,
    }
}

fn set_key(config: &AppConfig, kind: CredentialKind, value: &str) -> Result<()> {
    let store = wiring::open_credentials(config)?;
    store.set(kind, value)?;
    println!("Saved {} key to {}", kind, store.path().display());
    Ok(())
}

async fn voices(config: &AppConfig) -> Result<()> {
    let credentials = wiring::open_credentials(config)?;
    let remote: Vec<String> = remote_tiers(&config.synthesis, credentials.as_ref())
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    if remote.is_empty() {
        println!("Remote voices: none configured");
    } else {
        println!("Remote voices: {}", remote.join(", "));
    }

    let local = EspeakSynthesizer::new(&config.synthesis).await;
    if !local.is_supported() {
        println!("Local synthesis unavailable ({} not found)", config.synthesis.espeak_binary);
        return Ok(());
    }
    let catalog = local.voices().await;
    for voice in &catalog {
        println!("  {:<32} {:<8} {}", voice.name, voice.lang, voice.id);
    }
    match select_voice(&catalog, None, &config.synthesis.preferred_voices) {
        Some(voice) => println!("Calls use: {}", voice.name),
        None => println!("Calls use: engine default"),
    }
    Ok(())
}
