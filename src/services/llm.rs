use crate::core::config::StoryConfig;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use thiserror::Error;
use url::Url;

pub const TEMPERATURE: f64 = 0.7;
pub const SHARED_CHAT_PATH: &str = "/api/chat";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Which endpoint a request went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The user's own provider, authenticated with their key.
    Direct,
    /// The shared backend holding a server-side key.
    Shared,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompletionError {
    #[error("{message}")]
    Configuration { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("{message} (HTTP {status})")]
    Http {
        status: u16,
        message: String,
        error_type: Option<String>,
        code: Option<String>,
    },

    #[error("Unexpected response format: {0}")]
    Format(String),

    #[error("{message}")]
    Network { route: Route, message: String },
}

impl CompletionError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionError::Configuration { .. } => "configuration_error",
            CompletionError::InvalidRequest { .. } => "invalid_request_error",
            CompletionError::Http { .. } => "api_error",
            CompletionError::Format(_) => "format_error",
            CompletionError::Network { .. } => "network_error",
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync + Debug {
    async fn complete(&self, config: &StoryConfig, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub route: Route,
    pub url: String,
}

impl Target {
    /// Shared backend when the user opted in or has no key of their own,
    /// otherwise the configured provider.
    pub fn resolve(config: &StoryConfig) -> Result<Self, CompletionError> {
        let (route, base, path) = if config.use_backend_server || config.api_key.trim().is_empty() {
            (Route::Shared, &config.backend_url, SHARED_CHAT_PATH)
        } else {
            (Route::Direct, &config.base_url, "/chat/completions")
        };

        if let Err(e) = Url::parse(base) {
            return Err(CompletionError::Configuration {
                message: format!("Invalid URL '{}': {}. Check the connection settings.", base, e),
            });
        }

        Ok(Self {
            route,
            url: format!("{}{}", base.trim_end_matches('/'), path),
        })
    }
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f64,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<Value>,
}

// --- OpenAI-compatible HTTP client ---

#[derive(Debug, Clone, Default)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, config: &StoryConfig, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let target = Target::resolve(config)?;
        let body = build_request(config, &target, messages);
        debug!("Completion request to {:?} ({} messages)", target.route, messages.len());

        let mut request = self.client.post(&target.url).json(&body);
        if target.route == Route::Direct {
            request = request.header("Authorization", format!("Bearer {}", config.api_key));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| network_error(target.route, config, &e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| network_error(target.route, config, &e.to_string()))?;

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Request failed");
            return Err(parse_error_body(target.route, status.as_u16(), reason, &text));
        }

        parse_completion(&text)
    }
}

fn build_request<'a>(config: &'a StoryConfig, target: &Target, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
    // Model selection belongs to the backend on the shared route.
    let model = match target.route {
        Route::Direct => Some(config.model.as_str()),
        Route::Shared => None,
    };
    ChatRequest { model, messages, temperature: TEMPERATURE }
}

fn network_error(route: Route, config: &StoryConfig, cause: &str) -> CompletionError {
    let message = match route {
        Route::Direct => format!(
            "Could not reach {}: {}. Check the base URL and your network connection, or switch to the shared backend server in settings.",
            config.base_url, cause
        ),
        Route::Shared => format!(
            "Could not reach the Inkwell backend at {}: {}. Start it with `inkwell serve`, or enter your own API key in settings.",
            config.backend_url, cause
        ),
    };
    CompletionError::Network { route, message }
}

/// Maps a non-2xx body onto the error taxonomy, falling back to the status
/// text when the body carries no message.
pub fn parse_error_body(route: Route, status: u16, reason: &str, body: &str) -> CompletionError {
    let api_error = serde_json::from_str::<ErrorEnvelope>(body).ok().and_then(|e| e.error);

    let Some(ApiErrorBody { message: Some(message), error_type, code }) = api_error else {
        return CompletionError::Http {
            status,
            message: reason.to_string(),
            error_type: None,
            code: None,
        };
    };

    let code = code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    });

    match error_type.as_deref() {
        Some("configuration_error") => {
            let message = match route {
                Route::Shared => format!(
                    "{} Set OPENAI_API_KEY for the backend, or enter your own API key in settings.",
                    message
                ),
                Route::Direct => message,
            };
            CompletionError::Configuration { message }
        }
        Some("invalid_request_error") => CompletionError::InvalidRequest { message },
        _ => CompletionError::Http { status, message, error_type, code },
    }
}

/// Extracts `choices[0].message.content` from a success body.
pub fn parse_completion(body: &str) -> Result<String, CompletionError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| CompletionError::Format(format!("response is not JSON ({})", e)))?;

    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CompletionError::Format("missing choices[0].message.content".to_string()))
}
