//! Gemini `generateContent` client.
//!
//! A thin REST client: messages become `contents`, attachments become
//! base64 `inline_data` parts, schemas go into `generationConfig`, and the
//! search and URL-context tools are switched on per request.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{GenerationError, GenerationResult};
use crate::security::SecretString;
use crate::traits::ai::{Generator, Inference, InferenceRequest, Message, ModelTier, Role};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_PRO_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_FLASH_MODEL: &str = "gemini-2.5-flash";

/// Safety categories sent with threshold `OFF`.
const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_CIVIC_INTEGRITY",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Gemini API client.
pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    pro_model: String,
    flash_model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    safety_settings: Vec<Value>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<SecretString>) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: GEMINI_API_URL.to_string(),
            pro_model: DEFAULT_PRO_MODEL.to_string(),
            flash_model: DEFAULT_FLASH_MODEL.to_string(),
        })
    }

    /// Create from environment variable `GEMINI_API_TOKEN`.
    pub fn from_env() -> GenerationResult<Self> {
        let api_key = std::env::var("GEMINI_API_TOKEN")
            .map_err(|_| GenerationError::Config("GEMINI_API_TOKEN environment variable not set".into()))?;
        Self::new(api_key)
    }

    /// Override the model names used for each tier.
    pub fn with_models(mut self, pro: impl Into<String>, flash: impl Into<String>) -> Self {
        self.pro_model = pro.into();
        self.flash_model = flash.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Pro => &self.pro_model,
            ModelTier::Flash => &self.flash_model,
        }
    }

    fn build_request(request: &InferenceRequest) -> GenerationResult<GenerateRequest> {
        if request.messages.is_empty() {
            return Err(GenerationError::Config("request has no messages".into()));
        }
        if request.response_schema.is_some() && (request.web_search || request.url_context) {
            return Err(GenerationError::Config(
                "structured output cannot be combined with search or URL context".into(),
            ));
        }

        let contents = request.messages.iter().map(to_content).collect();

        let mut generation_config = json!({
            "temperature": request.temperature.unwrap_or(0.0),
        });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }
        if let Some(budget) = request.thinking_budget {
            generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
        }

        let mut tools = Vec::new();
        if request.web_search {
            tools.push(json!({ "google_search": {} }));
        }
        if request.url_context {
            tools.push(json!({ "url_context": {} }));
        }

        let safety_settings = HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "OFF" }))
            .collect();

        Ok(GenerateRequest {
            contents,
            generation_config,
            tools,
            safety_settings,
        })
    }

    fn extract_text(response: GenerateResponse) -> GenerationResult<String> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            let feedback = response
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no feedback".into());
            return Err(GenerationError::Empty(feedback));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(GenerationError::Empty(format!(
                "finish reason {}",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(text)
    }
}

fn to_content(message: &Message) -> Content {
    let role = match message.role {
        Role::User => "user",
        Role::Model => "model",
    };

    let mut parts = vec![json!({ "text": message.text })];
    for attachment in &message.attachments {
        parts.push(json!({
            "inline_data": {
                "mime_type": attachment.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&attachment.data),
            }
        }));
    }

    Content {
        role: role.to_string(),
        parts,
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<Inference> {
        let body = Self::build_request(request)?;
        let model = self.model_for(request.tier);
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        debug!(
            model,
            messages = request.messages.len(),
            structured = request.response_schema.is_some(),
            web_search = request.web_search,
            "Calling Gemini"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api(format!("{} - {}", status, text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        Self::extract_text(parsed).map(Inference::new)
    }
}
