//! Wire types for the Ollama HTTP API

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub images: Vec<&'a str>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
    pub images: Vec<&'a str>,
}

/// Body of `/api/generate`, and each line of its streamed form
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// One installed model as reported by `/api/tags`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl ModelInfo {
    /// Size in GB with one decimal, or `?` when unknown
    pub fn size_label(&self) -> String {
        match self.size {
            Some(bytes) => format!("{:.1} GB", bytes as f64 / 1_000_000_000.0),
            None => "?".to_string(),
        }
    }
}
