use std::time::Duration;

use tracing::debug;

use crate::client::UnifiedClient;
use crate::config::{ClientConfig, DEFAULT_TIMEOUT_MS, EndpointOverrides, Endpoints};
use crate::http::DynHttpTransport;
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::strategy::{AuthStrategy, RequestFormatter, ResponseParser};

/// Optional overrides accepted by [`create_llm_client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub endpoints: Option<EndpointOverrides>,
}

/// Resolves `config` against the registry and assembles a [`UnifiedClient`].
///
/// Unset fields take the provider entry's values. An unknown provider gets
/// OpenAI-compatible strategies, bearer auth and the `/chat/completions` and `/models`
/// endpoints, so `base_url` and `model` should be supplied for it.
///
/// # Examples
///
/// ```
/// use unillm::config::ClientConfig;
/// use unillm::factory::create_client;
/// use unillm::http::reqwest::default_dyn_transport;
/// use unillm::registry::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// let client = create_client(
///     ClientConfig::new("Gemini", "key").with_model("models/gemini-pro"),
///     &registry,
///     default_dyn_transport().unwrap(),
/// );
/// assert_eq!(client.provider(), "gemini");
/// assert_eq!(client.endpoints().chat, "/models/gemini-pro:generateContent");
/// ```
pub fn create_client(
    config: ClientConfig,
    registry: &ProviderRegistry,
    transport: DynHttpTransport,
) -> UnifiedClient {
    let provider = config.provider.trim().to_ascii_lowercase();
    let entry = registry.get(&provider);
    if entry.is_none() {
        debug!(provider = %provider, "provider not registered, using OpenAI-compatible defaults");
    }

    let model = config
        .model
        .filter(|model| !model.is_empty())
        .or_else(|| entry.map(|entry| entry.default_model.clone()))
        .unwrap_or_default();
    let base_url = config
        .base_url
        .filter(|url| !url.is_empty())
        .or_else(|| entry.map(|entry| entry.base_url.clone()))
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();
    let timeout_ms = config
        .timeout_ms
        .or_else(|| entry.map(|entry| entry.timeout_ms))
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    let overrides = config.endpoints.unwrap_or_default();
    let chat = overrides
        .chat
        .or_else(|| entry.map(|entry| entry.endpoints.chat.clone()))
        .unwrap_or_else(|| "/chat/completions".to_string());
    let models = overrides
        .models
        .or_else(|| entry.map(|entry| entry.endpoints.models.clone()))
        .unwrap_or_else(|| "/models".to_string());
    let endpoints = Endpoints {
        chat: replace_placeholders(&chat, &model, &provider),
        models: replace_placeholders(&models, &model, &provider),
    };

    let auth = config
        .auth
        .or_else(|| entry.map(|entry| entry.auth.clone()))
        .unwrap_or_default();
    let request = config
        .request
        .or_else(|| entry.map(|entry| entry.request.clone()))
        .unwrap_or_default();
    let response = config
        .response
        .or_else(|| entry.map(|entry| entry.response.clone()))
        .unwrap_or_default();

    UnifiedClient {
        auth: AuthStrategy::from_settings(&auth, &config.api_key),
        formatter: RequestFormatter::from_settings(&request, &model, &endpoints.chat),
        parser: ResponseParser::from_settings(&response),
        provider,
        base_url,
        api_key: config.api_key,
        model,
        timeout: Duration::from_millis(timeout_ms),
        endpoints,
        transport,
        retry: RetryPolicy::default(),
    }
}

/// 以 provider 标识和密钥快速创建客户端
pub fn create_llm_client(
    provider_id: &str,
    api_key: &str,
    options: ClientOptions,
    registry: &ProviderRegistry,
    transport: DynHttpTransport,
) -> UnifiedClient {
    let config = ClientConfig {
        provider: provider_id.to_string(),
        api_key: api_key.to_string(),
        base_url: options.base_url,
        model: options.model,
        timeout_ms: options.timeout_ms,
        endpoints: options.endpoints,
        ..ClientConfig::default()
    };
    create_client(config, registry, transport)
}

/// Substitutes `{model}` and `{provider}` in an endpoint template.
///
/// A Gemini-style `models/<name>` identifier is reduced to `<name>`; ids with further
/// slashes (e.g. `stabilityai/sdxl`) are kept whole.
pub fn replace_placeholders(endpoint: &str, model: &str, provider: &str) -> String {
    let model = match model.strip_prefix("models/") {
        Some(rest) if !rest.contains('/') => rest,
        _ => model,
    };
    endpoint
        .replace("{model}", model)
        .replace("{provider}", provider)
}
