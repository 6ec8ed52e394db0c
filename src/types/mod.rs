//! Shared data structures modeling chat requests and responses.
//!
//! These types normalize provider-specific payloads so the rest of the crate can stay
//! agnostic of individual API differences.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LLMError;

/// Chat role string compatible with provider-specific semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn assistant() -> Self {
        Self("assistant".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `system`, `user` 或 `assistant`
    pub fn is_known(&self) -> bool {
        matches!(self.0.as_str(), "system" | "user" | "assistant")
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Tunable generation options.
///
/// Every field is optional so callers only set the knobs they care about; formatters fill
/// in provider defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature within `0.0..=1.0`.
    pub temperature: Option<f64>,
    /// Maximum number of output tokens; must be positive when set.
    pub max_tokens: Option<u32>,
    /// Additional provider-specific parameters merged into OpenAI-compatible bodies.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Provider-agnostic chat request.
///
/// # Examples
///
/// ```
/// # use unillm::types::{ChatMessage, ChatRequest, Role};
/// let request = ChatRequest::new("Summarize Rust traits.")
///     .with_system("You are concise.")
///     .with_history(vec![ChatMessage::new(Role::user(), "hi"), ChatMessage::new(Role::assistant(), "hello")]);
/// assert_eq!(request.history.len(), 2);
/// assert_eq!(request.system_message.as_deref(), Some("You are concise."));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_message: String,
    pub system_message: Option<String>,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub options: Option<ChatOptions>,
}

impl ChatRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn temperature(&self) -> Option<f64> {
        self.options.as_ref().and_then(|options| options.temperature)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.options.as_ref().and_then(|options| options.max_tokens)
    }
}

/// Token usage metrics collected from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Normalized chat response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    /// Provider-specific diagnostics such as `finish_reason`.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// 模型列表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: Option<String>,
}

/// Outcome of a connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub message: String,
}

/// Value returned by calls that never fail past their boundary.
///
/// `data` always holds a usable value (an empty response on failure) and `error` carries
/// the classified failure, if any.
///
/// # Examples
///
/// ```
/// # use unillm::error::LLMError;
/// # use unillm::types::{ChatResponse, ClientResponse};
/// let failed = ClientResponse::failed(ChatResponse::default(), LLMError::connection("down"));
/// assert!(!failed.is_ok());
/// assert!(failed.into_result().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ClientResponse<T> {
    pub data: T,
    pub error: Option<LLMError>,
}

impl<T> ClientResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data, error: None }
    }

    pub fn failed(data: T, error: LLMError) -> Self {
        Self {
            data,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, dropping `data` when an error is present.
    pub fn into_result(self) -> Result<T, LLMError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}
