//! Generative model capability.
//!
//! One trait method covers every model interaction the stages need:
//! plain chat, structured output, grounding with web search or URL context,
//! and inline document attachments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenerationResult;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Inline binary content sent alongside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,

    /// Raw bytes; never written to transcripts
    #[serde(skip)]
    pub data: Vec<u8>,

    /// Size of `data`, kept so transcripts show what was sent
    pub size: usize,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            size: data.len(),
            data,
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Capability class of the model to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Strongest reasoning, slower
    Pro,
    #[default]
    Flash,
}

/// A single generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceRequest {
    pub messages: Vec<Message>,

    /// JSON schema the response must follow
    pub response_schema: Option<Value>,

    /// Let the model ground its answer in web search results
    pub web_search: bool,

    /// Let the model fetch URLs mentioned in the prompt
    pub url_context: bool,

    pub tier: ModelTier,

    /// Reasoning token budget; `None` leaves the provider default
    pub thinking_budget: Option<i32>,

    pub temperature: Option<f32>,
}

impl InferenceRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn with_url_context(mut self) -> Self {
        self.url_context = true;
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_thinking_budget(mut self, budget: i32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Text of the last user message.
    pub fn last_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
    }
}

/// The model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub text: String,
}

impl Inference {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A generative model provider.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one generation.
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<Inference>;
}
