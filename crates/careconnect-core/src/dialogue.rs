//! Dialogue session: the ordered message history and the request/response cycle against the
//! AI backend.
//!
//! A turn is split in two synchronous halves so an event loop can run the network call as a
//! separate task: [`DialogueSession::begin_turn`] appends the user message and builds the
//! request, [`DialogueSession::finish_turn`] appends exactly one assistant message (the reply
//! or the fallback) and clears the loading flag. [`DialogueSession::send_message`] composes
//! both for callers that simply want to await the reply.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DialogueConfig;
use crate::credentials::{CredentialKind, CredentialStore};
use crate::error::{CoreResult, DialogueError};
use crate::message::Message;

/// One request to the AI backend: the history before this turn plus the new user text.
#[derive(Clone, PartialEq)]
pub struct DialogueRequest {
    pub history: Vec<Message>,
    pub text: String,
    pub max_output_tokens: u32,
    pub credential: String,
}

impl fmt::Debug for DialogueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogueRequest")
            .field("history", &self.history.len())
            .field("text", &self.text)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Language-model backend. Implementations must not retry; the session decides what a
/// failure means for the conversation.
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    async fn generate(&self, request: &DialogueRequest) -> Result<String, DialogueError>;
}

/// Clears the loading flag however the awaiting future ends (reply, error or drop).
struct LoadingGuard<'a> {
    loading: &'a mut bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        *self.loading = false;
    }
}

/// Owns the conversation. Append-only: messages are never reordered or removed.
pub struct DialogueSession {
    messages: Vec<Message>,
    loading: bool,
    error: Option<String>,
    credential: Option<String>,
    backend: Arc<dyn DialogueBackend>,
    credentials: Arc<dyn CredentialStore>,
    max_output_tokens: u32,
    fallback_reply: String,
}

impl DialogueSession {
    /// Start a session seeded with the configured greeting. The backend credential is read
    /// from the store once, here.
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        credentials: Arc<dyn CredentialStore>,
        config: &DialogueConfig,
    ) -> Self {
        let credential = credentials.get(CredentialKind::Gemini);
        if credential.is_none() {
            info!("Dialogue session started without a Gemini API key");
        }
        Self {
            messages: vec![Message::assistant(config.greeting.clone())],
            loading: false,
            error: None,
            credential,
            backend,
            credentials,
            max_output_tokens: config.max_output_tokens,
            fallback_reply: config.fallback_reply.clone(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Last turn failure, if any. Kept until a credential is saved.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn backend(&self) -> Arc<dyn DialogueBackend> {
        Arc::clone(&self.backend)
    }

    /// Persist a new backend key and use it from the next turn on.
    pub fn save_credential(&mut self, key: &str) -> CoreResult<()> {
        self.credentials.set(CredentialKind::Gemini, key)?;
        let key = key.trim();
        self.credential = (!key.is_empty()).then(|| key.to_string());
        self.error = None;
        Ok(())
    }

    /// Append the user message and mark the session loading.
    ///
    /// Returns the request to send, or `None` when no request may be made (missing
    /// credential); in that case the turn has already been finished with the fallback reply.
    pub fn begin_turn(&mut self, text: &str) -> Option<DialogueRequest> {
        let history = self.messages.clone();
        self.messages.push(Message::user(text));
        self.loading = true;

        match self.credential.clone() {
            Some(credential) => {
                debug!(history = history.len(), "Dialogue turn started");
                Some(DialogueRequest {
                    history,
                    text: text.to_string(),
                    max_output_tokens: self.max_output_tokens,
                    credential,
                })
            }
            None => {
                self.finish_turn(Err(DialogueError::MissingCredential));
                None
            }
        }
    }

    /// Append exactly one assistant message for the outstanding turn and clear loading.
    pub fn finish_turn(&mut self, outcome: Result<String, DialogueError>) {
        match outcome {
            Ok(reply) => {
                debug!(chars = reply.len(), "Dialogue reply received");
                self.messages.push(Message::assistant(reply));
            }
            Err(e) => {
                warn!(error = %e, "Dialogue turn failed");
                self.error = Some(e.to_string());
                self.messages.push(Message::assistant(self.fallback_reply.clone()));
            }
        }
        self.loading = false;
    }

    /// Full turn: append the user message, await the backend, append the reply or fallback.
    pub async fn send_message(&mut self, text: &str) {
        let Some(request) = self.begin_turn(text) else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let outcome = {
            let _guard = LoadingGuard {
                loading: &mut self.loading,
            };
            backend.generate(&request).await
        };
        self.finish_turn(outcome);
    }
}
