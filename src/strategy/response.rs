use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ChatResponse, TokenUsage};

use super::normalize_tag;

/// Extracts the text fragment carried by one decoded stream frame.
pub type StreamChunkFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
/// Parses a complete non-streaming body.
pub type FullResponseFn = Arc<dyn Fn(&Value) -> Option<ChatResponse> + Send + Sync>;

/// 响应解析标签
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseKind {
    #[default]
    OpenAiCompatible,
    Gemini,
    Ollama,
    Custom,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::OpenAiCompatible => "openai_compatible",
            ResponseKind::Gemini => "gemini",
            ResponseKind::Ollama => "ollama",
            ResponseKind::Custom => "custom",
        }
    }
}

impl From<String> for ResponseKind {
    fn from(tag: String) -> Self {
        match normalize_tag(&tag).as_str() {
            "gemini" => ResponseKind::Gemini,
            "ollama" => ResponseKind::Ollama,
            "custom" => ResponseKind::Custom,
            _ => ResponseKind::OpenAiCompatible,
        }
    }
}

impl From<ResponseKind> for String {
    fn from(kind: ResponseKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Declarative response-parser settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ResponseSettings {
    #[serde(rename = "type", default)]
    pub kind: ResponseKind,
    #[serde(skip)]
    pub stream_fn: Option<StreamChunkFn>,
    #[serde(skip)]
    pub full_fn: Option<FullResponseFn>,
}

impl ResponseSettings {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_stream_fn<F>(mut self, stream_fn: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.stream_fn = Some(Arc::new(stream_fn));
        self
    }

    pub fn with_full_fn<F>(mut self, full_fn: F) -> Self
    where
        F: Fn(&Value) -> Option<ChatResponse> + Send + Sync + 'static,
    {
        self.full_fn = Some(Arc::new(full_fn));
        self
    }
}

impl fmt::Debug for ResponseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSettings")
            .field("kind", &self.kind)
            .field("stream_fn", &self.stream_fn.as_ref().map(|_| "<fn>"))
            .field("full_fn", &self.full_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Extracts text and metadata from provider-native response bodies.
#[derive(Clone)]
pub enum ResponseParser {
    OpenAiCompatible,
    Gemini,
    /// Line-delimited JSON aware.
    Ollama,
    Custom {
        stream: StreamChunkFn,
        full: Option<FullResponseFn>,
    },
}

impl ResponseParser {
    /// A custom tag without a stream function falls back to OpenAI-compatible.
    pub fn from_settings(settings: &ResponseSettings) -> Self {
        match (settings.kind, &settings.stream_fn) {
            (ResponseKind::Gemini, _) => ResponseParser::Gemini,
            (ResponseKind::Ollama, _) => ResponseParser::Ollama,
            (ResponseKind::Custom, Some(stream)) => ResponseParser::Custom {
                stream: Arc::clone(stream),
                full: settings.full_fn.clone(),
            },
            _ => ResponseParser::OpenAiCompatible,
        }
    }

    /// Text carried by one stream frame, or `None` when the frame has no text.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use unillm::strategy::ResponseParser;
    ///
    /// let parser = ResponseParser::OpenAiCompatible;
    /// let chunk = json!({"choices":[{"delta":{"content":"Hel"}}]});
    /// assert_eq!(parser.parse_stream_chunk(&chunk).as_deref(), Some("Hel"));
    /// assert_eq!(parser.parse_stream_chunk(&json!({"choices":[{"delta":{}}]})), None);
    /// ```
    pub fn parse_stream_chunk(&self, chunk: &Value) -> Option<String> {
        let text = match self {
            ResponseParser::OpenAiCompatible => chunk
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            ResponseParser::Gemini => gemini_text(chunk).map(str::to_string),
            ResponseParser::Ollama => ollama_text(chunk).map(str::to_string),
            ResponseParser::Custom { stream, .. } => return stream(chunk).filter(|s| !s.is_empty()),
        };
        text.or_else(|| chunk.as_str().map(str::to_string))
            .filter(|text| !text.is_empty())
    }

    /// Parses a complete response body; `None` means the shape was not recognised.
    pub fn parse_full_response(&self, body: &str) -> Option<ChatResponse> {
        if let ResponseParser::Ollama = self {
            return parse_ollama_body(body);
        }

        let value = match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            Err(_) => {
                return match self {
                    ResponseParser::Custom {
                        full: Some(full), ..
                    } => full(&Value::String(body.to_string())),
                    _ => None,
                };
            }
        };

        if let Some(text) = value.as_str() {
            return Some(ChatResponse::text(text));
        }

        match self {
            ResponseParser::OpenAiCompatible => parse_openai(&value),
            ResponseParser::Gemini => parse_gemini(&value),
            ResponseParser::Custom { full: Some(full), .. } => full(&value),
            ResponseParser::Custom { full: None, .. } => parse_openai(&value),
            ResponseParser::Ollama => None,
        }
    }
}

impl fmt::Debug for ResponseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseParser::OpenAiCompatible => "OpenAiCompatible",
            ResponseParser::Gemini => "Gemini",
            ResponseParser::Ollama => "Ollama",
            ResponseParser::Custom { .. } => "Custom",
        };
        f.write_str(name)
    }
}

fn gemini_text(value: &Value) -> Option<&str> {
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
}

fn ollama_text(value: &Value) -> Option<&str> {
    value
        .pointer("/message/content")
        .or_else(|| value.get("response"))
        .and_then(Value::as_str)
}

fn parse_openai(value: &Value) -> Option<ChatResponse> {
    let choice = value.pointer("/choices/0")?;
    let content = choice
        .pointer("/message/content")
        .or_else(|| choice.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let usage = value.get("usage").map(|usage| TokenUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    });

    let mut meta = Map::new();
    copy_field(&mut meta, "finish_reason", choice.get("finish_reason"));
    copy_field(&mut meta, "id", value.get("id"));

    Some(ChatResponse {
        content,
        usage,
        model: string_field(value, "model"),
        meta,
    })
}

fn parse_gemini(value: &Value) -> Option<ChatResponse> {
    value.pointer("/candidates/0/content/parts/0")?;
    let content = gemini_text(value).unwrap_or_default().to_string();

    let usage = value.get("usageMetadata").map(|usage| {
        let prompt = usage.get("promptTokenCount").and_then(Value::as_u64);
        let completion = usage.get("candidatesTokenCount").and_then(Value::as_u64);
        let total = usage
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(prompt.unwrap_or(0) + completion.unwrap_or(0));
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: Some(total),
        }
    });

    let mut meta = Map::new();
    copy_field(&mut meta, "finish_reason", value.pointer("/candidates/0/finishReason"));
    copy_field(&mut meta, "safety_ratings", value.pointer("/candidates/0/safetyRatings"));

    Some(ChatResponse {
        content,
        usage,
        model: string_field(value, "modelVersion").or_else(|| string_field(value, "modelId")),
        meta,
    })
}

/// Ollama answers with one JSON object per line even when `stream` is false on some
/// versions, so every line is folded into a single response.
fn parse_ollama_body(body: &str) -> Option<ChatResponse> {
    let frames: Vec<Value> = match serde_json::from_str::<Value>(body) {
        Ok(value) => vec![value],
        Err(_) => body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect(),
    };

    let mut response = ChatResponse::default();
    let mut recognised = false;

    for frame in &frames {
        if let Some(text) = frame.as_str() {
            response.content.push_str(text);
            recognised = true;
            continue;
        }
        if let Some(text) = ollama_text(frame) {
            response.content.push_str(text);
            recognised = true;
        }
        if frame.get("done").and_then(Value::as_bool) == Some(true) {
            recognised = true;
            let prompt = frame.get("prompt_eval_count").and_then(Value::as_u64);
            let completion = frame.get("eval_count").and_then(Value::as_u64);
            if prompt.is_some() || completion.is_some() {
                response.usage = Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
                });
            }
            response.model = string_field(frame, "model");
            copy_field(&mut response.meta, "done_reason", frame.get("done_reason"));
            copy_field(&mut response.meta, "total_duration", frame.get("total_duration"));
        }
    }

    recognised.then_some(response)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn copy_field(meta: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(value) = value.filter(|value| !value.is_null()) {
        meta.insert(key.to_string(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn openai_full_response_maps_usage_and_meta() {
        let body = r#"{"id":"cmpl-1","model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"Hi!"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#;
        let response = ResponseParser::OpenAiCompatible
            .parse_full_response(body)
            .expect("parsed");
        assert_eq!(response.content, "Hi!");
        assert_eq!(response.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(7));
        assert_eq!(response.meta["finish_reason"], "stop");
        assert_eq!(response.meta["id"], "cmpl-1");
    }

    #[test]
    fn unrecognised_shapes_return_none() {
        let parser = ResponseParser::OpenAiCompatible;
        assert!(parser.parse_full_response(r#"{"result":"x"}"#).is_none());
        assert!(parser.parse_full_response("<html>").is_none());
        assert!(ResponseParser::Gemini.parse_full_response(r#"{"candidates":[]}"#).is_none());
    }

    #[test]
    fn bare_json_strings_are_content() {
        for parser in [
            ResponseParser::OpenAiCompatible,
            ResponseParser::Gemini,
            ResponseParser::Ollama,
        ] {
            assert_eq!(
                parser.parse_stream_chunk(&json!("plain")).as_deref(),
                Some("plain")
            );
            let full = parser.parse_full_response(r#""whole""#).expect("string body");
            assert_eq!(full.content, "whole");
        }
    }

    #[test]
    fn gemini_usage_sums_when_total_missing() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Bonjour"}], "role": "model"},
                "finishReason": "STOP",
                "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "NEGLIGIBLE"}]
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3},
            "modelVersion": "gemini-2.0-flash"
        })
        .to_string();
        let response = ResponseParser::Gemini.parse_full_response(&body).expect("parsed");
        assert_eq!(response.content, "Bonjour");
        let usage = response.usage.expect("usage");
        assert_eq!(usage.total_tokens, Some(7));
        assert_eq!(response.meta["finish_reason"], "STOP");
        assert!(response.meta["safety_ratings"].is_array());
        assert_eq!(response.model.as_deref(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn ollama_concatenates_line_delimited_frames() {
        let body = concat!(
            "{\"model\":\"qwen3:32b\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"model\":\"qwen3:32b\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"model\":\"qwen3:32b\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,",
            "\"done_reason\":\"stop\",\"total_duration\":1200,\"prompt_eval_count\":9,\"eval_count\":2}\n"
        );
        let response = ResponseParser::Ollama.parse_full_response(body).expect("parsed");
        assert_eq!(response.content, "Hello");
        assert_eq!(response.model.as_deref(), Some("qwen3:32b"));
        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(11));
        assert_eq!(response.meta["done_reason"], "stop");

        let generate = r#"{"model":"m","response":"ok","done":true}"#;
        let response = ResponseParser::Ollama.parse_full_response(generate).expect("parsed");
        assert_eq!(response.content, "ok");
        assert!(ResponseParser::Ollama.parse_full_response("{}").is_none());
    }

    #[test]
    fn stream_chunks_per_parser() {
        let gemini = json!({"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]});
        assert_eq!(ResponseParser::Gemini.parse_stream_chunk(&gemini).as_deref(), Some("Hi"));
        let ollama = json!({"response":"tok","done":false});
        assert_eq!(ResponseParser::Ollama.parse_stream_chunk(&ollama).as_deref(), Some("tok"));
        let empty = json!({"choices":[{"delta":{"content":""}}]});
        assert_eq!(ResponseParser::OpenAiCompatible.parse_stream_chunk(&empty), None);
    }

    #[test]
    fn custom_parser_uses_supplied_functions() {
        let settings = ResponseSettings::new(ResponseKind::Custom)
            .with_stream_fn(|chunk| chunk.get("t").and_then(Value::as_str).map(str::to_string))
            .with_full_fn(|value| {
                value
                    .get("output")
                    .and_then(Value::as_str)
                    .map(ChatResponse::text)
            });
        let parser = ResponseParser::from_settings(&settings);
        assert_eq!(parser.parse_stream_chunk(&json!({"t":"x"})).as_deref(), Some("x"));
        assert_eq!(
            parser
                .parse_full_response(r#"{"output":"done"}"#)
                .map(|r| r.content)
                .as_deref(),
            Some("done")
        );

        let incomplete = ResponseSettings::new(ResponseKind::Custom);
        assert!(matches!(
            ResponseParser::from_settings(&incomplete),
            ResponseParser::OpenAiCompatible
        ));
    }
}
