use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::errors::LLMError;
use crate::log_llm_operation;

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Make a single JSON-mode request to the provider with an optional system message
    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String, LLMError> {
        let started = Instant::now();
        log_llm_operation!(start, "make_request", provider = self.provider_name(), prompt_length = prompt.len());

        let result = match self {
            LLMProvider::OpenAI(provider) => provider.make_request(system_message, prompt).await,
            LLMProvider::Gemini(provider) => provider.make_request(system_message, prompt).await,
        };

        match &result {
            Ok(text) => {
                log_llm_operation!(
                    success,
                    "make_request",
                    provider = self.provider_name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    response_length = text.len()
                );
            }
            Err(e) => {
                log_llm_operation!(error, "make_request", provider = self.provider_name(), error = e);
            }
        }

        result
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, LLMError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::ClientSetup(e.to_string()))
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> LLMError {
    if err.is_timeout() {
        LLMError::Timeout(timeout.as_secs())
    } else {
        LLMError::Transport(err.to_string())
    }
}

/// OpenAI provider implementation
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

/// OpenAI-specific request structures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    response_format: OpenAIResponseFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: LLMMessage,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LLMError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout,
        })
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String, LLMError> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            messages.push(LLMMessage {
                role: "system".to_string(),
                content: sys_msg.to_string(),
            });
        }

        messages.push(LLMMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            response_format: OpenAIResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(LLMError::Http {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let response_content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(LLMError::EmptyResponse)?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

/// Gemini-specific request structures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LLMError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            timeout,
        })
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String, LLMError> {
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.9,
                max_output_tokens: 8192,
                response_mime_type: "application/json".to_string(),
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(LLMError::Http {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let response_content = gemini_response
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .ok_or(LLMError::EmptyResponse)?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Centralized JSON response parser with robust extraction logic
#[derive(Clone)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Extract JSON from LLM responses that might be wrapped in markdown or other formatting
    pub fn extract_json_from_response(content: &str) -> String {
        // Try to find JSON within markdown code blocks
        if let Some(start) = content.find("```json") {
            if let Some(end) = content[start + 7..].find("```") {
                let json_start = start + 7;
                let json_end = json_start + end;
                return content[json_start..json_end].trim().to_string();
            }
        }

        // Try to find JSON within plain code blocks
        if let Some(start) = content.find("```") {
            if let Some(end) = content[start + 3..].find("```") {
                let json_start = start + 3;
                let json_end = json_start + end;
                let potential_json = content[json_start..json_end].trim();
                if potential_json.starts_with('{') || potential_json.starts_with('[') {
                    return potential_json.to_string();
                }
            }
        }

        // Whichever bracket opens first decides between object and array
        let object_start = content.find('{');
        let array_start = content.find('[');
        let prefer_array = match (object_start, array_start) {
            (Some(o), Some(a)) => a < o,
            (None, Some(_)) => true,
            _ => false,
        };

        let (open, close) = if prefer_array { ('[', ']') } else { ('{', '}') };
        if let Some(start) = content.find(open) {
            if let Some(end) = content.rfind(close) {
                if end > start {
                    return content[start..=end].to_string();
                }
            }
        }

        content.trim().to_string()
    }

    /// Parse JSON response into a specific type
    pub fn parse_json_response<T>(&self, content: &str) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = Self::extract_json_from_response(content);
        serde_json::from_str::<T>(&json_content)
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl LLMProviderFactory {
    /// Create a new LLM provider instance based on provider type.
    /// Fails only if the timeout-bounded HTTP client cannot be built.
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<LLMProvider, LLMError> {
        let provider = match provider_type {
            LLMProviderType::OpenAI => {
                LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model, timeout)?)
            }
            LLMProviderType::Gemini => {
                LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model, timeout)?)
            }
        };
        Ok(provider)
    }
}
