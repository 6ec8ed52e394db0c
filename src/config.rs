use serde::{Deserialize, Serialize};

use crate::strategy::{AuthSettings, RequestSettings, ResponseSettings};

/// 默认请求超时 (毫秒)
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Sampling temperature used when a request does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_SSE: &str = "text/event-stream";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Chat and model-listing paths, relative to the base URL unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub chat: String,
    pub models: String,
}

/// Per-client overrides for [`Endpoints`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    pub chat: Option<String>,
    pub models: Option<String>,
}

/// Registry entry describing how to talk to one provider.
///
/// # Examples
///
/// ```
/// use unillm::config::ProviderConfig;
/// use unillm::strategy::AuthKind;
///
/// let entry: ProviderConfig = serde_json::from_str(r#"{
///     "provider_name": "Local vLLM",
///     "base_url": "http://localhost:8000/v1",
///     "endpoints": {"chat": "/chat/completions", "models": "/models"},
///     "default_model": "llama-3-8b",
///     "auth": {"type": "custom"}
/// }"#).unwrap();
/// assert_eq!(entry.timeout_ms, 120_000);
/// assert_eq!(entry.auth.kind, AuthKind::Custom);
/// assert!(entry.requires_api_key);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Human-readable name, e.g. `OpenAI`.
    pub provider_name: String,
    pub base_url: String,
    pub endpoints: Endpoints,
    pub default_model: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Local providers such as Ollama run without a key.
    #[serde(default = "default_true")]
    pub requires_api_key: bool,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub request: RequestSettings,
    #[serde(default)]
    pub response: ResponseSettings,
}

/// Caller-facing configuration resolved by the factory against a [`ProviderConfig`].
///
/// Unset fields take the registry entry's values; unknown providers fall back to
/// OpenAI-compatible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub endpoints: Option<EndpointOverrides>,
    pub auth: Option<AuthSettings>,
    pub request: Option<RequestSettings>,
    pub response: Option<ResponseSettings>,
}

impl ClientConfig {
    pub fn new(provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_endpoints(mut self, endpoints: EndpointOverrides) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_request(mut self, request: RequestSettings) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: ResponseSettings) -> Self {
        self.response = Some(response);
        self
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}
