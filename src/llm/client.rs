use super::{ContentPart, LanguageModel, LlmError, LlmMessage, Role};
use crate::http::build_client;
use crate::media::split_data_url;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Anthropic,
    OpenAi,
    Groq,
}

impl Provider {
    /// Picks the hosting provider from the model name.
    pub fn for_model(model: &str) -> Option<Self> {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("gemini") {
            Some(Self::Google)
        } else if model.starts_with("claude") {
            Some(Self::Anthropic)
        } else if model.starts_with("gpt")
            || model.starts_with("chatgpt")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            Some(Self::OpenAi)
        } else if model.starts_with("meta-llama/") || model.starts_with("llama") {
            Some(Self::Groq)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Groq => "groq",
        }
    }

    fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Google => "GOOGLE_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        let api_key = Provider::for_model(&model)
            .and_then(|provider| std::env::var(provider.api_key_var()).ok())
            .filter(|key| !key.trim().is_empty());
        Self {
            model,
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(32768),
            base_url: std::env::var("LLM_BASE_URL").ok(),
            api_key,
        }
    }
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    fn endpoint(&self, provider: Provider, path: &str) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/');
        format!("{base}{path}")
    }

    async fn chat_completions(
        &self,
        provider: Provider,
        api_key: &str,
        messages: &[LlmMessage],
    ) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            messages: messages.iter().map(ChatMessage::from_message).collect(),
        };
        let response = self
            .http
            .post(self.endpoint(provider, "/chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            warn!(
                target = "atelier.llm",
                provider = provider.name(),
                %status,
                detail = %detail,
                "llm_request_failed"
            );
            return Err(LlmError::Http(format!("HTTP {status}")));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))
    }

    async fn anthropic_messages(
        &self,
        api_key: &str,
        messages: &[LlmMessage],
    ) -> Result<String, LlmError> {
        let system = messages
            .iter()
            .filter(|message| message.role == Role::System)
            .flat_map(|message| message.content.iter())
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let body = AnthropicRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: (!system.is_empty()).then_some(system),
            messages: messages
                .iter()
                .filter(|message| message.role != Role::System)
                .map(AnthropicMessage::from_message)
                .collect::<Result<_, _>>()?,
        };
        let response = self
            .http
            .post(self.endpoint(Provider::Anthropic, "/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            warn!(
                target = "atelier.llm",
                provider = "anthropic",
                %status,
                detail = %detail,
                "llm_request_failed"
            );
            return Err(LlmError::Http(format!("HTTP {status}")));
        }

        let payload: AnthropicResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .and_then(|item| item.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, messages: &[LlmMessage]) -> Result<String, LlmError> {
        let provider = Provider::for_model(&self.config.model)
            .ok_or_else(|| LlmError::UnsupportedModel(self.config.model.clone()))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey(provider.api_key_var()))?;

        debug!(
            target = "atelier.llm",
            provider = provider.name(),
            model = %self.config.model,
            messages = messages.len(),
            images = messages.iter().map(LlmMessage::image_count).sum::<usize>(),
            "llm_request"
        );

        match provider {
            Provider::Anthropic => self.anthropic_messages(api_key, messages).await,
            _ => self.chat_completions(provider, api_key, messages).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ChatPart<'a>>,
}

impl<'a> ChatMessage<'a> {
    fn from_message(message: &'a LlmMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => ChatPart::Text { text },
                    ContentPart::Image(url) => ChatPart::ImageUrl {
                        image_url: ImageUrl { url },
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<AnthropicPart<'a>>,
}

impl<'a> AnthropicMessage<'a> {
    fn from_message(message: &'a LlmMessage) -> Result<Self, LlmError> {
        let content = message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => Ok(AnthropicPart::Text { text }),
                ContentPart::Image(url) => {
                    let (media_type, data) = split_data_url(url).ok_or_else(|| {
                        LlmError::InvalidResponse("image part is not a base64 data url".into())
                    })?;
                    Ok(AnthropicPart::Image {
                        source: AnthropicSource {
                            kind: "base64",
                            media_type,
                            data,
                        },
                    })
                }
            })
            .collect::<Result<_, LlmError>>()?;
        Ok(Self {
            role: message.role.as_str(),
            content,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicPart<'a> {
    Text { text: &'a str },
    Image { source: AnthropicSource<'a> },
}

#[derive(Debug, Serialize)]
struct AnthropicSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}
