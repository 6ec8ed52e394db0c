use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::DEFAULT_TEMPERATURE;
use crate::error::LLMError;
use crate::models::max_tokens_for_model;
use crate::types::ChatRequest;

use super::normalize_tag;

/// Caller-supplied request body builder.
pub type FormatFn = Arc<dyn Fn(&ChatRequest) -> Result<Value, LLMError> + Send + Sync>;

/// 请求格式标签
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    #[default]
    OpenAiCompatible,
    Gemini,
    Ollama,
    Custom,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::OpenAiCompatible => "openai_compatible",
            RequestKind::Gemini => "gemini",
            RequestKind::Ollama => "ollama",
            RequestKind::Custom => "custom",
        }
    }
}

impl From<String> for RequestKind {
    fn from(tag: String) -> Self {
        match normalize_tag(&tag).as_str() {
            "gemini" => RequestKind::Gemini,
            "ollama" => RequestKind::Ollama,
            "custom" => RequestKind::Custom,
            _ => RequestKind::OpenAiCompatible,
        }
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Declarative request-format settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RequestSettings {
    #[serde(rename = "type", default)]
    pub kind: RequestKind,
    /// Extra top-level fields merged into OpenAI-compatible bodies.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_params: Map<String, Value>,
    /// Ollama only: build `/api/generate` prompt bodies unless the chat endpoint is a chat
    /// endpoint.
    #[serde(default)]
    pub use_generate_format: bool,
    #[serde(skip)]
    pub format_fn: Option<FormatFn>,
}

impl RequestSettings {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_additional_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.additional_params.insert(name.into(), value);
        self
    }

    pub fn with_format_fn<F>(mut self, format_fn: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<Value, LLMError> + Send + Sync + 'static,
    {
        self.format_fn = Some(Arc::new(format_fn));
        self
    }
}

impl fmt::Debug for RequestSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSettings")
            .field("kind", &self.kind)
            .field("additional_params", &self.additional_params)
            .field("use_generate_format", &self.use_generate_format)
            .field("format_fn", &self.format_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Turns a [`ChatRequest`] into a provider-native JSON body.
#[derive(Clone)]
pub enum RequestFormatter {
    OpenAiCompatible {
        model: String,
        additional_params: Map<String, Value>,
    },
    Gemini {
        model: String,
    },
    Ollama {
        model: String,
        /// `/api/generate` prompt shape instead of `/api/chat` messages.
        generate: bool,
    },
    Custom(FormatFn),
}

impl RequestFormatter {
    /// Builds a formatter; a custom tag without a function falls back to OpenAI-compatible.
    pub fn from_settings(settings: &RequestSettings, model: &str, chat_endpoint: &str) -> Self {
        match (settings.kind, &settings.format_fn) {
            (RequestKind::Gemini, _) => RequestFormatter::Gemini {
                model: model.to_string(),
            },
            (RequestKind::Ollama, _) => RequestFormatter::Ollama {
                model: model.to_string(),
                generate: settings.use_generate_format && !chat_endpoint.contains("chat"),
            },
            (RequestKind::Custom, Some(format_fn)) => RequestFormatter::Custom(Arc::clone(format_fn)),
            _ => RequestFormatter::OpenAiCompatible {
                model: model.to_string(),
                additional_params: settings.additional_params.clone(),
            },
        }
    }

    pub fn is_gemini(&self) -> bool {
        matches!(self, RequestFormatter::Gemini { .. })
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            RequestFormatter::OpenAiCompatible { model, .. }
            | RequestFormatter::Gemini { model }
            | RequestFormatter::Ollama { model, .. } => Some(model),
            RequestFormatter::Custom(_) => None,
        }
    }

    /// 生成请求体
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::strategy::RequestFormatter;
    /// use unillm::types::ChatRequest;
    ///
    /// let formatter = RequestFormatter::Gemini { model: "gemini-2.0-flash".into() };
    /// let body = formatter
    ///     .format_request(&ChatRequest::new("hi").with_system("be brief"), true)
    ///     .unwrap();
    /// assert_eq!(body["contents"][0]["parts"][0]["text"], "be brief\n\nhi");
    /// assert!(body.get("stream").is_none());
    /// ```
    ///
    /// # Errors
    ///
    /// Only custom formatters fail; their errors are reported as
    /// [`LLMError::RequestFormat`].
    pub fn format_request(&self, request: &ChatRequest, stream: bool) -> Result<Value, LLMError> {
        match self {
            RequestFormatter::OpenAiCompatible {
                model,
                additional_params,
            } => Ok(openai_body(model, additional_params, request, stream)),
            RequestFormatter::Gemini { model } => Ok(gemini_body(model, request)),
            RequestFormatter::Ollama { model, generate } => {
                Ok(ollama_body(model, *generate, request, stream))
            }
            RequestFormatter::Custom(format_fn) => {
                let mut body = format_fn(request).map_err(|err| {
                    if matches!(err, LLMError::RequestFormat { .. }) {
                        err
                    } else {
                        LLMError::request_format(err.message().to_string())
                    }
                })?;
                if let Some(object) = body.as_object_mut() {
                    object.insert("stream".to_string(), Value::Bool(stream));
                }
                Ok(body)
            }
        }
    }
}

impl fmt::Debug for RequestFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFormatter::OpenAiCompatible { model, .. } => {
                f.debug_struct("OpenAiCompatible").field("model", model).finish()
            }
            RequestFormatter::Gemini { model } => f.debug_struct("Gemini").field("model", model).finish(),
            RequestFormatter::Ollama { model, generate } => f
                .debug_struct("Ollama")
                .field("model", model)
                .field("generate", generate)
                .finish(),
            RequestFormatter::Custom(_) => f.write_str("Custom"),
        }
    }
}

fn role_tagged_messages(request: &ChatRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if let Some(system) = request.system_message.as_deref().filter(|s| !s.is_empty()) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.history {
        messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
    }
    if !request.user_message.is_empty() {
        messages.push(json!({ "role": "user", "content": request.user_message }));
    }
    messages
}

fn openai_body(
    model: &str,
    additional_params: &Map<String, Value>,
    request: &ChatRequest,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), Value::Array(role_tagged_messages(request)));
    body.insert(
        "temperature".to_string(),
        json!(request.temperature().unwrap_or(DEFAULT_TEMPERATURE)),
    );
    body.insert(
        "max_tokens".to_string(),
        json!(request.max_tokens().unwrap_or_else(|| max_tokens_for_model(model))),
    );
    body.insert("stream".to_string(), Value::Bool(stream));

    for (key, value) in additional_params {
        body.insert(key.clone(), value.clone());
    }
    if let Some(options) = &request.options {
        for (key, value) in &options.extra {
            body.insert(key.clone(), value.clone());
        }
    }

    Value::Object(body)
}

fn gemini_body(model: &str, request: &ChatRequest) -> Value {
    let mut contents: Vec<Value> = request
        .history
        .iter()
        .map(|message| {
            let role = if message.role.as_str() == "assistant" {
                "model"
            } else {
                message.role.as_str()
            };
            json!({ "role": role, "parts": [{ "text": message.content }] })
        })
        .collect();

    let system = request.system_message.as_deref().filter(|s| !s.is_empty());
    let user_text = match system {
        Some(system) if request.history.is_empty() => {
            format!("{system}\n\n{}", request.user_message)
        }
        _ => request.user_message.clone(),
    };
    contents.push(json!({ "role": "user", "parts": [{ "text": user_text }] }));

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": request.temperature().unwrap_or(DEFAULT_TEMPERATURE),
            "maxOutputTokens": request.max_tokens().unwrap_or_else(|| max_tokens_for_model(model)),
        }
    });

    // Gemini has no system role inside `contents`.
    if let Some(system) = system.filter(|_| !request.history.is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    body
}

fn ollama_body(model: &str, generate: bool, request: &ChatRequest, stream: bool) -> Value {
    let mut options = Map::new();
    options.insert(
        "temperature".to_string(),
        json!(request.temperature().unwrap_or(DEFAULT_TEMPERATURE)),
    );
    if let Some(max_tokens) = request.max_tokens() {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }

    if generate {
        return json!({
            "model": model,
            "prompt": generate_prompt(request),
            "stream": stream,
            "options": options,
        });
    }

    let mut messages = role_tagged_messages(request);
    if messages.is_empty() {
        messages.push(json!({ "role": "user", "content": "Hello" }));
    }
    json!({
        "model": model,
        "messages": messages,
        "stream": stream,
        "options": options,
    })
}

fn generate_prompt(request: &ChatRequest) -> String {
    let mut prompt = request.system_message.clone().unwrap_or_default();

    if !request.history.is_empty() {
        let transcript = request
            .history
            .iter()
            .map(|message| match message.role.as_str() {
                "user" => format!("User: {}", message.content),
                "assistant" => format!("Assistant: {}", message.content),
                _ => message.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        prompt = if prompt.is_empty() {
            transcript
        } else {
            format!("{prompt}\n\n{transcript}")
        };
    }

    if !request.user_message.is_empty() {
        prompt = if prompt.is_empty() {
            request.user_message.clone()
        } else {
            format!("{prompt}\n\nUser: {}\nAssistant:", request.user_message)
        };
    }

    prompt
}
