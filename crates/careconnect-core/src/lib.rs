//! careconnect-core: configuration, credential storage, the dialogue session and the
//! SBAR consultation report.
//!
//! The voice crate builds the call orchestrator on top of these types; the CLI add-on wires
//! them to real devices and providers.

mod config;
mod credentials;
mod dialogue;
mod error;
mod gemini;
mod message;
mod report;

pub use config::{
    AppConfig, CallTimings, CaptureConfig, DialogueConfig, SynthesisConfig, DEFAULT_CONFIG_PATH,
};
pub use credentials::{CredentialKind, CredentialStore, MemoryCredentialStore, TomlCredentialStore};
pub use dialogue::{DialogueBackend, DialogueRequest, DialogueSession};
pub use error::{CoreError, CoreResult, DialogueError};
pub use gemini::GeminiBackend;
pub use message::{Message, Role};
pub use report::{format_duration, SbarReport, REPORT_DISCLAIMER};
