mod client;
mod json;
#[cfg(test)]
pub mod mock;

pub use client::{LlmClient, LlmConfig};
pub use json::generate_json;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("unsupported model `{0}`")]
    UnsupportedModel(String),
    #[error("missing api key for {0}")]
    MissingApiKey(&'static str),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("model output is not valid json: {0}")]
    Parse(String),
    #[error("model output does not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// `data:<mime>;base64,...` URL.
    Image(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl LlmMessage {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|part| matches!(part, ContentPart::Image(_)))
            .count()
    }
}

/// A hosted multimodal model: messages in, raw text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, messages: &[LlmMessage]) -> Result<String, LlmError>;
}
