use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::http::HttpRequest;

use super::normalize_tag;

/// Caller-supplied request transform used by custom authentication.
pub type AuthTransform = Arc<dyn Fn(HttpRequest) -> HttpRequest + Send + Sync>;

/// 鉴权方式标签
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthKind {
    #[default]
    Bearer,
    QueryParam,
    /// `x-api-key` header.
    ApiKeyHeader,
    Custom,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Bearer => "bearer",
            AuthKind::QueryParam => "query_param",
            AuthKind::ApiKeyHeader => "x-api-key",
            AuthKind::Custom => "custom",
        }
    }
}

impl From<String> for AuthKind {
    fn from(tag: String) -> Self {
        match normalize_tag(&tag).as_str() {
            "query_param" | "query" => AuthKind::QueryParam,
            "x_api_key" | "api_key_header" => AuthKind::ApiKeyHeader,
            "custom" => AuthKind::Custom,
            _ => AuthKind::Bearer,
        }
    }
}

impl From<AuthKind> for String {
    fn from(kind: AuthKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Declarative authentication settings, as stored in a provider entry.
///
/// # Examples
///
/// ```
/// use unillm::strategy::{AuthKind, AuthSettings};
///
/// let settings: AuthSettings = serde_json::from_str(r#"{"type":"query_param","param_name":"token"}"#).unwrap();
/// assert_eq!(settings.kind, AuthKind::QueryParam);
///
/// let lenient: AuthSettings = serde_json::from_str(r#"{"type":"hmac"}"#).unwrap();
/// assert_eq!(lenient.kind, AuthKind::Bearer);
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(rename = "type", default)]
    pub kind: AuthKind,
    /// Query parameter name; defaults to `key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    /// Header set by custom auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    /// Header value for custom auth; defaults to the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_value: Option<String>,
    #[serde(skip)]
    pub transform: Option<AuthTransform>,
}

impl AuthSettings {
    pub fn new(kind: AuthKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_param_name(mut self, name: impl Into<String>) -> Self {
        self.param_name = Some(name.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.header_name = Some(name.into());
        self.header_value = value;
        self
    }

    /// 自定义鉴权函数
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(HttpRequest) -> HttpRequest + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("kind", &self.kind)
            .field("param_name", &self.param_name)
            .field("header_name", &self.header_name)
            .field("header_value", &self.header_value.as_ref().map(|_| "<redacted>"))
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Stamps credentials onto outgoing requests.
#[derive(Clone)]
pub enum AuthStrategy {
    /// `Authorization: Bearer <key>`.
    Bearer { api_key: String },
    /// `?<param_name>=<key>` appended to the URL.
    QueryParam { api_key: String, param_name: String },
    /// A fixed header such as `x-api-key: <key>`.
    Header { name: String, value: String },
    Custom(AuthTransform),
    /// Leaves the request untouched.
    Passthrough,
}

impl AuthStrategy {
    /// Resolves settings plus the client's API key into a strategy.
    ///
    /// A custom tag prefers a header name/value pair over a transform; with neither, the
    /// request passes through unchanged.
    pub fn from_settings(settings: &AuthSettings, api_key: &str) -> Self {
        match settings.kind {
            AuthKind::Bearer => AuthStrategy::Bearer {
                api_key: api_key.to_string(),
            },
            AuthKind::QueryParam => AuthStrategy::QueryParam {
                api_key: api_key.to_string(),
                param_name: settings
                    .param_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "key".to_string()),
            },
            AuthKind::ApiKeyHeader => AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: api_key.to_string(),
            },
            AuthKind::Custom => {
                if let Some(name) = settings.header_name.as_ref().filter(|name| !name.is_empty()) {
                    AuthStrategy::Header {
                        name: name.clone(),
                        value: settings
                            .header_value
                            .clone()
                            .unwrap_or_else(|| api_key.to_string()),
                    }
                } else if let Some(transform) = &settings.transform {
                    AuthStrategy::Custom(Arc::clone(transform))
                } else {
                    AuthStrategy::Passthrough
                }
            }
        }
    }

    /// Returns `request` with credentials applied.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::http::HttpRequest;
    /// use unillm::strategy::AuthStrategy;
    ///
    /// let auth = AuthStrategy::QueryParam { api_key: "k".into(), param_name: "key".into() };
    /// let request = auth.apply_auth(HttpRequest::get("https://example.com/v1beta/models"));
    /// assert_eq!(request.url, "https://example.com/v1beta/models?key=k");
    /// ```
    pub fn apply_auth(&self, request: HttpRequest) -> HttpRequest {
        match self {
            AuthStrategy::Bearer { api_key } => {
                request.with_header("Authorization", format!("Bearer {api_key}"))
            }
            AuthStrategy::QueryParam {
                api_key,
                param_name,
            } => request.with_query_param(param_name, api_key),
            AuthStrategy::Header { name, value } => request.with_header(name.clone(), value.clone()),
            AuthStrategy::Custom(transform) => transform(request),
            AuthStrategy::Passthrough => request,
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Bearer { .. } => f.write_str("Bearer"),
            AuthStrategy::QueryParam { param_name, .. } => {
                f.debug_struct("QueryParam").field("param_name", param_name).finish()
            }
            AuthStrategy::Header { name, .. } => f.debug_struct("Header").field("name", name).finish(),
            AuthStrategy::Custom(_) => f.write_str("Custom"),
            AuthStrategy::Passthrough => f.write_str("Passthrough"),
        }
    }
}
