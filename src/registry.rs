use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::{Endpoints, ProviderConfig};
use crate::strategy::{
    AuthKind, AuthSettings, RequestKind, RequestSettings, ResponseKind, ResponseSettings,
};

/// Registration failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The identifier is already a built-in or registered provider.
    #[error("provider already registered: {0}")]
    AlreadyRegistered(String),
}

/// 内置 provider 标识
pub const BUILTIN_PROVIDERS: [&str; 7] = [
    "openai",
    "claude",
    "gemini",
    "deepseek",
    "hunyuan",
    "siliconflow",
    "ollama",
];

static BUILTINS: LazyLock<Vec<(&'static str, ProviderConfig)>> = LazyLock::new(|| {
    BUILTIN_PROVIDERS
        .iter()
        .map(|id| (*id, builtin_config(id)))
        .collect()
});

fn openai_compatible(
    name: &str,
    base_url: &str,
    default_model: &str,
    auth: AuthSettings,
    request: RequestSettings,
) -> ProviderConfig {
    ProviderConfig {
        provider_name: name.to_string(),
        base_url: base_url.to_string(),
        endpoints: Endpoints {
            chat: "/chat/completions".to_string(),
            models: "/models".to_string(),
        },
        default_model: default_model.to_string(),
        timeout_ms: 60_000,
        requires_api_key: true,
        auth,
        request,
        response: ResponseSettings::default(),
    }
}

fn builtin_config(id: &str) -> ProviderConfig {
    let enhanced =
        || RequestSettings::default().with_additional_param("enable_enhancement", json!(true));

    match id {
        "claude" => openai_compatible(
            "Claude",
            "https://api.anthropic.com/v1",
            "claude-sonnet-4-20250514",
            AuthSettings::new(AuthKind::ApiKeyHeader),
            RequestSettings::default(),
        ),
        "gemini" => ProviderConfig {
            provider_name: "Gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            endpoints: Endpoints {
                chat: "/models/{model}:generateContent".to_string(),
                models: "/models".to_string(),
            },
            default_model: "gemini-2.0-flash".to_string(),
            timeout_ms: 60_000,
            requires_api_key: true,
            auth: AuthSettings::new(AuthKind::QueryParam).with_param_name("key"),
            request: RequestSettings::new(RequestKind::Gemini),
            response: ResponseSettings::new(ResponseKind::Gemini),
        },
        "deepseek" => openai_compatible(
            "DeepSeek",
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            AuthSettings::default(),
            RequestSettings::default(),
        ),
        "hunyuan" => openai_compatible(
            "Hunyuan",
            "https://api.hunyuan.cloud.tencent.com/v1",
            "hunyuan-turbos-latest",
            AuthSettings::default(),
            enhanced(),
        ),
        "siliconflow" => openai_compatible(
            "SiliconFlow",
            "https://api.siliconflow.cn/v1",
            "Qwen/QwQ-32B",
            AuthSettings::default(),
            enhanced(),
        ),
        "ollama" => ProviderConfig {
            provider_name: "Ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            endpoints: Endpoints {
                chat: "/api/chat".to_string(),
                models: "/api/tags".to_string(),
            },
            default_model: "qwen3:32b".to_string(),
            timeout_ms: 180_000,
            requires_api_key: false,
            auth: AuthSettings::new(AuthKind::Custom),
            request: RequestSettings::new(RequestKind::Ollama),
            response: ResponseSettings::new(ResponseKind::Ollama),
        },
        _ => openai_compatible(
            "OpenAI",
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            AuthSettings::default(),
            RequestSettings::default(),
        ),
    }
}

/// Provider configuration lookup: immutable built-ins plus caller-registered entries.
///
/// Identifiers are case-insensitive. Custom entries shadow built-ins on lookup, but only
/// [`ProviderRegistry::override_provider`] may shadow one deliberately.
///
/// # Examples
///
/// ```
/// use unillm::registry::ProviderRegistry;
///
/// let mut registry = ProviderRegistry::new();
/// let mut entry = registry.get("openai").unwrap().clone();
/// entry.base_url = "https://proxy.example.com/v1".to_string();
///
/// assert!(registry.register("OpenAI", entry.clone()).is_err());
/// registry.override_provider("openai", entry);
/// assert_eq!(registry.get("openai").unwrap().base_url, "https://proxy.example.com/v1");
/// assert!(registry.unregister("openai"));
/// assert_eq!(registry.get("openai").unwrap().base_url, "https://api.openai.com/v1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    custom: HashMap<String, ProviderConfig>,
    /// Registration order of custom identifiers.
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new provider; fails if the identifier is a built-in or already registered.
    pub fn register(&mut self, id: &str, config: ProviderConfig) -> Result<(), RegistryError> {
        let key = normalize_id(id);
        if self.has(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        debug!(provider = %key, "registering provider");
        self.insert(key, config);
        Ok(())
    }

    /// Adds or replaces a provider unconditionally, shadowing a built-in if needed.
    pub fn override_provider(&mut self, id: &str, config: ProviderConfig) {
        let key = normalize_id(id);
        debug!(provider = %key, "overriding provider");
        self.insert(key, config);
    }

    /// Custom entries take precedence over built-ins.
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        let key = normalize_id(id);
        self.custom.get(&key).or_else(|| {
            BUILTINS
                .iter()
                .find(|(builtin, _)| *builtin == key)
                .map(|(_, config)| config)
        })
    }

    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Removes a custom entry; built-ins cannot be removed. Returns whether one existed.
    pub fn unregister(&mut self, id: &str) -> bool {
        let key = normalize_id(id);
        let removed = self.custom.remove(&key).is_some();
        if removed {
            self.order.retain(|existing| *existing != key);
        }
        removed
    }

    /// Built-in identifiers followed by custom ones, without duplicates.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = BUILTIN_PROVIDERS.iter().map(|id| id.to_string()).collect();
        for id in &self.order {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Drops every custom entry.
    pub fn clear(&mut self) {
        self.custom.clear();
        self.order.clear();
    }

    fn insert(&mut self, key: String, config: ProviderConfig) {
        if self.custom.insert(key.clone(), config).is_none() {
            self.order.push(key);
        }
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}
