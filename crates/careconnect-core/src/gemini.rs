//! Google Generative Language backend (`models/{model}:generateContent`).
//!
//! History is sent as `contents` with roles mapped to `user` / `model`, followed by the new
//! user text. The reply is the concatenation of the first candidate's text parts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::DialogueConfig;
use crate::dialogue::{DialogueBackend, DialogueRequest};
use crate::error::DialogueError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiBackend {
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: &DialogueConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

fn build_body(request: &DialogueRequest) -> GenerateRequest<'_> {
    let mut contents: Vec<Content<'_>> = request
        .history
        .iter()
        .map(|m| Content {
            role: m.role.backend_role(),
            parts: vec![Part { text: &m.text }],
        })
        .collect();
    contents.push(Content {
        role: "user",
        parts: vec![Part {
            text: &request.text,
        }],
    });
    GenerateRequest {
        contents,
        generation_config: GenerationConfig {
            max_output_tokens: request.max_output_tokens,
        },
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, DialogueError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(DialogueError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl DialogueBackend for GeminiBackend {
    async fn generate(&self, request: &DialogueRequest) -> Result<String, DialogueError> {
        let body = build_body(request);
        debug!(model = %self.model, contents = body.contents.len(), "Gemini request");

        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &request.credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| DialogueError::Transport(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DialogueError::Backend { status, body });
        }

        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| DialogueError::Transport(format!("response parse failed: {}", e)))?;
        extract_text(parsed)
    }
}
