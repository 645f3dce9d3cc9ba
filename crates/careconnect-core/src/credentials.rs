//! Credential storage for the AI backend and speech providers.
//!
//! Keys are kept in a small TOML file next to the user's data (the same shape as a
//! `user_config.toml`), with an environment fallback so `.env` files keep working.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::{CoreError, CoreResult};

/// Which provider a credential unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Google Generative Language (dialogue backend).
    Gemini,
    /// ElevenLabs remote synthesis.
    ElevenLabs,
    /// OpenAI-compatible transcription endpoint (speech capture).
    Transcription,
}

impl CredentialKind {
    pub fn env_var(self) -> &'static str {
        match self {
            CredentialKind::Gemini => "GEMINI_API_KEY",
            CredentialKind::ElevenLabs => "ELEVENLABS_API_KEY",
            CredentialKind::Transcription => "STT_API_KEY",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialKind::Gemini => "gemini",
            CredentialKind::ElevenLabs => "elevenlabs",
            CredentialKind::Transcription => "stt",
        };
        f.write_str(name)
    }
}

impl FromStr for CredentialKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(CredentialKind::Gemini),
            "elevenlabs" | "eleven" => Ok(CredentialKind::ElevenLabs),
            "stt" | "transcription" => Ok(CredentialKind::Transcription),
            other => Err(CoreError::UnknownCredential(other.to_string())),
        }
    }
}

/// Persistent key-value store for credentials. Read at construction time by the components
/// that need a key, written on an explicit save.
pub trait CredentialStore: Send + Sync {
    fn get(&self, kind: CredentialKind) -> Option<String>;
    fn set(&self, kind: CredentialKind, value: &str) -> CoreResult<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elevenlabs_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stt_api_key: Option<String>,
}

impl CredentialFile {
    fn slot(&mut self, kind: CredentialKind) -> &mut Option<String> {
        match kind {
            CredentialKind::Gemini => &mut self.gemini_api_key,
            CredentialKind::ElevenLabs => &mut self.elevenlabs_api_key,
            CredentialKind::Transcription => &mut self.stt_api_key,
        }
    }

    fn value(&self, kind: CredentialKind) -> Option<&String> {
        match kind {
            CredentialKind::Gemini => self.gemini_api_key.as_ref(),
            CredentialKind::ElevenLabs => self.elevenlabs_api_key.as_ref(),
            CredentialKind::Transcription => self.stt_api_key.as_ref(),
        }
    }
}

/// TOML-backed store. A missing file behaves like an empty one and is created on first save.
pub struct TomlCredentialStore {
    path: PathBuf,
    file: RwLock<CredentialFile>,
    env_fallback: bool,
}

impl TomlCredentialStore {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            CredentialFile::default()
        };
        Ok(Self {
            path,
            file: RwLock::new(file),
            env_fallback: true,
        })
    }

    /// Disable the environment fallback (file contents only).
    pub fn without_env_fallback(mut self) -> Self {
        self.env_fallback = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, file: &CredentialFile) -> CoreResult<()> {
        let content = toml::to_string_pretty(file)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl CredentialStore for TomlCredentialStore {
    fn get(&self, kind: CredentialKind) -> Option<String> {
        let stored = self
            .file
            .read()
            .ok()
            .and_then(|f| f.value(kind).cloned());
        let value = if self.env_fallback {
            stored.or_else(|| std::env::var(kind.env_var()).ok())
        } else {
            stored
        };
        value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn set(&self, kind: CredentialKind, value: &str) -> CoreResult<()> {
        let mut file = self
            .file
            .write()
            .map_err(|e| CoreError::Store(format!("credential lock poisoned: {}", e)))?;
        *file.slot(kind) = Some(value.trim().to_string());
        self.save(&file)
    }
}

/// In-memory store for tests and for sessions that should not touch disk.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKind, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(kind: CredentialKind, value: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut values) = store.values.write() {
            values.insert(kind, value.into());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, kind: CredentialKind) -> Option<String> {
        self.values
            .read()
            .ok()
            .and_then(|v| v.get(&kind).cloned())
            .filter(|s| !s.trim().is_empty())
    }

    fn set(&self, kind: CredentialKind, value: &str) -> CoreResult<()> {
        self.values
            .write()
            .map_err(|e| CoreError::Store(format!("credential lock poisoned: {}", e)))?
            .insert(kind, value.trim().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("user_config.toml");

        let store = TomlCredentialStore::open(&path).unwrap().without_env_fallback();
        assert_eq!(store.get(CredentialKind::Gemini), None);

        store.set(CredentialKind::Gemini, "  abc123 ").unwrap();
        assert_eq!(store.get(CredentialKind::Gemini).as_deref(), Some("abc123"));

        let reopened = TomlCredentialStore::open(&path).unwrap().without_env_fallback();
        assert_eq!(reopened.get(CredentialKind::Gemini).as_deref(), Some("abc123"));
        assert_eq!(reopened.get(CredentialKind::ElevenLabs), None);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let store = MemoryCredentialStore::with(CredentialKind::ElevenLabs, "   ");
        assert_eq!(store.get(CredentialKind::ElevenLabs), None);
    }

    #[test]
    fn kind_parses_cli_names() {
        assert_eq!("gemini".parse::<CredentialKind>().unwrap(), CredentialKind::Gemini);
        assert_eq!("STT".parse::<CredentialKind>().unwrap(), CredentialKind::Transcription);
        assert!("openai".parse::<CredentialKind>().is_err());
        assert_eq!(CredentialKind::ElevenLabs.to_string(), "elevenlabs");
    }
}
