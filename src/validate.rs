use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::registry::ProviderRegistry;
use crate::types::ChatRequest;

/// Rejections raised before a client or request is used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A configuration field is missing or malformed.
    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    /// A chat request field is missing or out of range.
    #[error("invalid request `{field}`: {reason}")]
    InvalidRequest { field: &'static str, reason: String },
}

impl ValidationError {
    fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    fn request(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field,
            reason: reason.into(),
        }
    }
}

/// Checks a [`ClientConfig`] before it is handed to the factory.
///
/// The API key may only be empty for providers whose registry entry sets
/// `requires_api_key = false`.
///
/// # Examples
///
/// ```
/// use unillm::config::ClientConfig;
/// use unillm::registry::ProviderRegistry;
/// use unillm::validate::{validate_client_config, ValidationError};
///
/// let registry = ProviderRegistry::new();
/// assert!(validate_client_config(&ClientConfig::new("ollama", ""), &registry).is_ok());
/// assert!(matches!(
///     validate_client_config(&ClientConfig::new("openai", ""), &registry),
///     Err(ValidationError::InvalidConfig { field: "api_key", .. })
/// ));
/// ```
pub fn validate_client_config(
    config: &ClientConfig,
    registry: &ProviderRegistry,
) -> Result<(), ValidationError> {
    let provider = config.provider.trim();
    if provider.is_empty() {
        return Err(ValidationError::config("provider", "provider is required"));
    }

    let requires_key = registry
        .get(provider)
        .map(|entry| entry.requires_api_key)
        .unwrap_or(true);
    if requires_key && config.api_key.trim().is_empty() {
        return Err(ValidationError::config(
            "api_key",
            format!("API key is required for provider \"{provider}\""),
        ));
    }

    if let Some(base_url) = &config.base_url {
        Url::parse(base_url)
            .map_err(|err| ValidationError::config("base_url", format!("not a valid URL: {err}")))?;
    }

    if config.timeout_ms == Some(0) {
        return Err(ValidationError::config("timeout_ms", "timeout must be positive"));
    }

    if let Some(endpoints) = &config.endpoints {
        let blank = |endpoint: &Option<String>| endpoint.as_deref().is_some_and(|e| e.trim().is_empty());
        if blank(&endpoints.chat) {
            return Err(ValidationError::config("endpoints.chat", "endpoint must not be empty"));
        }
        if blank(&endpoints.models) {
            return Err(ValidationError::config("endpoints.models", "endpoint must not be empty"));
        }
    }

    Ok(())
}

/// Checks message presence, roles and option ranges.
pub fn validate_chat_request(request: &ChatRequest) -> Result<(), ValidationError> {
    if request.user_message.trim().is_empty() {
        return Err(ValidationError::request("user_message", "user message is required"));
    }

    if let Some(message) = request.history.iter().find(|message| !message.role.is_known()) {
        return Err(ValidationError::request(
            "history",
            format!("unknown role \"{}\"", message.role.as_str()),
        ));
    }

    if let Some(temperature) = request.temperature() {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ValidationError::request(
                "temperature",
                format!("{temperature} is outside 0..=1"),
            ));
        }
    }

    if request.max_tokens() == Some(0) {
        return Err(ValidationError::request("max_tokens", "must be positive"));
    }

    Ok(())
}

/// 布尔版本的 [`validate_chat_request`]
pub fn is_valid_chat_request(request: &ChatRequest) -> bool {
    validate_chat_request(request).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointOverrides;
    use crate::types::{ChatMessage, ChatOptions, Role};

    #[test]
    fn config_checks() {
        let registry = ProviderRegistry::new();
        let ok = ClientConfig::new("custom-llm", "k").with_base_url("http://localhost:8080/v1");
        assert!(validate_client_config(&ok, &registry).is_ok());

        let cases = [
            (ClientConfig::new("  ", "k"), "provider"),
            (ClientConfig::new("custom-llm", ""), "api_key"),
            (ClientConfig::new("openai", "k").with_base_url("not a url"), "base_url"),
            (ClientConfig::new("openai", "k").with_timeout_ms(0), "timeout_ms"),
            (
                ClientConfig::new("openai", "k").with_endpoints(EndpointOverrides {
                    chat: Some(" ".to_string()),
                    models: None,
                }),
                "endpoints.chat",
            ),
        ];
        for (config, expected) in cases {
            match validate_client_config(&config, &registry) {
                Err(ValidationError::InvalidConfig { field, .. }) => assert_eq!(field, expected),
                other => panic!("unexpected result for {expected}: {other:?}"),
            }
        }
    }

    #[test]
    fn request_checks() {
        let valid = ChatRequest::new("hi").with_options(ChatOptions {
            temperature: Some(1.0),
            max_tokens: Some(1),
            ..ChatOptions::default()
        });
        assert!(is_valid_chat_request(&valid));

        assert!(!is_valid_chat_request(&ChatRequest::new("   ")));
        assert!(!is_valid_chat_request(
            &ChatRequest::new("hi").with_history(vec![ChatMessage::new(Role("tool".into()), "x")])
        ));

        for temperature in [-0.1, 1.5, f64::NAN] {
            let request = ChatRequest::new("hi").with_options(ChatOptions {
                temperature: Some(temperature),
                ..ChatOptions::default()
            });
            assert!(!is_valid_chat_request(&request), "{temperature}");
        }

        let zero = ChatRequest::new("hi").with_options(ChatOptions {
            max_tokens: Some(0),
            ..ChatOptions::default()
        });
        assert_eq!(
            validate_chat_request(&zero),
            Err(ValidationError::InvalidRequest {
                field: "max_tokens",
                reason: "must be positive".to_string()
            })
        );
    }
}
