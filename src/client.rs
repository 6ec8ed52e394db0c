use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CONTENT_TYPE_JSON, Endpoints};
use crate::error::{ErrorContext, LLMError, classify_response};
use crate::handler::StreamHandler;
use crate::http::{DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse};
use crate::retry::{RetryPolicy, with_retry};
use crate::stream::{FrameFormat, Utf8Accumulator, split_frames};
use crate::strategy::{AuthStrategy, RequestFormatter, ResponseParser};
use crate::types::{
    ChatRequest, ChatResponse, ClientResponse, ConnectionStatus, ModelInfo,
};

/// Provider-agnostic chat client.
///
/// `chat` and `test_connection` never fail past their boundary: errors are classified and
/// returned inside [`ClientResponse`]. `stream_chat` reports only through its handler and
/// `get_models` degrades to an empty list.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// 单次对话请求
    async fn chat(&self, request: &ChatRequest) -> ClientResponse<ChatResponse>;

    /// 流式对话 结果通过 handler 回调
    async fn stream_chat(&self, request: &ChatRequest, handler: &mut dyn StreamHandler);

    /// 列出可用模型 失败时返回空列表
    async fn get_models(&self) -> Vec<ModelInfo>;

    /// 连通性检查 (带重试)
    async fn test_connection(&self) -> ClientResponse<ConnectionStatus>;
}

/// Thread-safe handle to a client implementation.
pub type DynClient = Arc<dyn LLMClient>;

/// [`LLMClient`] assembled from one provider configuration and three strategies.
///
/// Built by [`crate::factory::create_client`]; the configuration is fixed for the
/// lifetime of the value.
pub struct UnifiedClient {
    pub(crate) provider: String,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) timeout: Duration,
    pub(crate) endpoints: Endpoints,
    pub(crate) auth: AuthStrategy,
    pub(crate) formatter: RequestFormatter,
    pub(crate) parser: ResponseParser,
    pub(crate) transport: DynHttpTransport,
    pub(crate) retry: RetryPolicy,
}

/// What a single stream frame contributes.
#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Text(String),
    Skip,
    Done,
}

impl UnifiedClient {
    /// Replaces the backoff used by [`LLMClient::test_connection`].
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Cache key of the form `{base_url}:{first four characters of the key}`.
    ///
    /// A missing key is rendered as `none`.
    pub fn client_id(&self) -> String {
        let prefix: String = self.api_key.chars().take(4).collect();
        let prefix = if prefix.is_empty() { "none".to_string() } else { prefix };
        format!("{}:{prefix}", self.base_url)
    }

    /// Resolves an endpoint against the base URL; absolute endpoints are used verbatim.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') || endpoint.is_empty() {
            return format!("{base}{endpoint}");
        }
        Url::parse(&format!("{base}/"))
            .and_then(|base| base.join(endpoint))
            .map(String::from)
            .unwrap_or_else(|_| format!("{base}/{endpoint}"))
    }

    /// Chat URL used for streaming; Gemini switches to its SSE method.
    fn stream_url(&self) -> String {
        let url = self.endpoint_url(&self.endpoints.chat);
        if !self.formatter.is_gemini() {
            return url;
        }
        let url = url.replace(":generateContent", ":streamGenerateContent");
        if url.contains("alt=sse") {
            url
        } else {
            HttpRequest::get(url).with_query_param("alt", "sse").url
        }
    }

    fn context(&self, endpoint: &str) -> ErrorContext {
        ErrorContext {
            provider: Some(self.provider.clone()),
            model: Some(self.model.clone()),
            base_url: Some(self.base_url.clone()),
            endpoint: Some(endpoint.to_string()),
            status: None,
        }
    }

    fn post_request(&self, url: String, body: &Value) -> Result<HttpRequest, LLMError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| LLMError::request_format(format!("failed to serialize request: {err}")))?;
        let request = HttpRequest::post_json(url, payload).with_timeout(self.timeout);
        Ok(self.auth.apply_auth(request))
    }

    fn models_request(&self) -> HttpRequest {
        let request = HttpRequest::get(self.endpoint_url(&self.endpoints.models))
            .with_header("Accept", CONTENT_TYPE_JSON)
            .with_timeout(self.timeout);
        self.auth.apply_auth(request)
    }

    async fn try_chat(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let body = self.formatter.format_request(request, false)?;
        let http = self.post_request(self.endpoint_url(&self.endpoints.chat), &body)?;
        debug!(provider = %self.provider, endpoint = %self.endpoints.chat, "sending chat request");
        let response = self.transport.send(http).await?;
        self.parse_chat_response(response)
    }

    fn parse_chat_response(&self, response: HttpResponse) -> Result<ChatResponse, LLMError> {
        if !response.is_success() {
            return Err(classify_response(response.status, &response.text_lossy()));
        }
        let text = response.into_string()?;
        self.parser.parse_full_response(&text).ok_or_else(|| {
            LLMError::response_parse(format!(
                "unrecognised chat response from {}: {}",
                self.provider,
                preview(&text)
            ))
        })
    }

    /// One non-streaming request after the streaming transport produced no response.
    async fn fallback(
        &self,
        request: &ChatRequest,
        handler: &mut dyn StreamHandler,
        token: Option<&CancellationToken>,
    ) -> Result<(), LLMError> {
        let body = self.formatter.format_request(request, false)?;
        let http = self.post_request(self.endpoint_url(&self.endpoints.chat), &body)?;
        let response = until_cancelled(token, self.transport.send(http))
            .await
            .ok_or_else(LLMError::aborted)??;

        if !response.is_success() {
            return Err(classify_response(response.status, &response.text_lossy()));
        }

        let text = response.text_lossy();
        let chunk = match self.parser.parse_full_response(&text) {
            Some(parsed) => parsed.content,
            None => serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| self.parser.parse_stream_chunk(&value))
                .unwrap_or(text),
        };
        if !chunk.is_empty() {
            handler.on_data(&chunk);
        }
        Ok(())
    }

    async fn read_stream(
        &self,
        response: HttpStreamResponse,
        handler: &mut dyn StreamHandler,
        token: Option<&CancellationToken>,
    ) -> Result<(), LLMError> {
        let format = FrameFormat::from_content_type(response.content_type());
        debug!(provider = %self.provider, status = response.status, ?format, "stream opened");

        let mut body = response.body;
        let mut decoder = Utf8Accumulator::new();
        let mut buffer = String::new();

        loop {
            let next = until_cancelled(token, body.next())
                .await
                .ok_or_else(LLMError::aborted)?;
            let bytes = match next {
                Some(chunk) => chunk?,
                None => break,
            };

            buffer.push_str(&decoder.push(&bytes));
            let split = split_frames(&buffer, format);
            buffer = split.remainder;

            for frame in &split.frames {
                match self.process_frame(frame) {
                    FrameOutcome::Text(text) => handler.on_data(&text),
                    FrameOutcome::Done => return Ok(()),
                    FrameOutcome::Skip => {}
                }
                if token.is_some_and(CancellationToken::is_cancelled) {
                    return Err(LLMError::aborted());
                }
            }
        }

        buffer.push_str(&decoder.finish());
        if let FrameOutcome::Text(text) = self.process_frame(&buffer) {
            handler.on_data(&text);
        }
        Ok(())
    }

    fn process_frame(&self, frame: &str) -> FrameOutcome {
        let line = frame.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return FrameOutcome::Skip;
        }

        if let Some(data) = trimmed.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            if data.trim() == "[DONE]" {
                return FrameOutcome::Done;
            }
            if data.trim().is_empty() {
                return FrameOutcome::Skip;
            }
            return self.extract_text(data);
        }

        if trimmed.starts_with(':')
            || trimmed.starts_with("event:")
            || trimmed.starts_with("id:")
            || trimmed.starts_with("retry:")
        {
            return FrameOutcome::Skip;
        }

        self.extract_text(line)
    }

    fn extract_text(&self, payload: &str) -> FrameOutcome {
        let candidate = payload.trim();
        if candidate.starts_with('{') || candidate.starts_with('[') || candidate.starts_with('"') {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return self
                    .parser
                    .parse_stream_chunk(&value)
                    .map_or(FrameOutcome::Skip, FrameOutcome::Text);
            }
        }
        FrameOutcome::Text(payload.to_string())
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let response = self.transport.send(self.models_request()).await?;
        if !response.is_success() {
            return Err(classify_response(response.status, &response.text_lossy()));
        }
        let text = response.into_string()?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|err| LLMError::response_parse(format!("model list is not JSON: {err}")))?;
        parse_model_list(&value)
            .ok_or_else(|| LLMError::response_parse("unrecognised model list shape"))
    }

    async fn probe(&self) -> Result<(), LLMError> {
        let response = self.transport.send(self.models_request()).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(classify_response(response.status, &response.text_lossy()))
        }
    }
}

#[async_trait]
impl LLMClient for UnifiedClient {
    async fn chat(&self, request: &ChatRequest) -> ClientResponse<ChatResponse> {
        match self.try_chat(request).await {
            Ok(response) => ClientResponse::ok(response),
            Err(err) => {
                let err = err.with_context(self.context(&self.endpoints.chat));
                warn!(provider = %self.provider, kind = %err.kind(), error = %err, "chat request failed");
                ClientResponse::failed(ChatResponse::default(), err)
            }
        }
    }

    async fn stream_chat(&self, request: &ChatRequest, handler: &mut dyn StreamHandler) {
        let context = self.context(&self.endpoints.chat);
        let token = handler.cancellation_token();
        let token = token.as_ref();

        if token.is_some_and(CancellationToken::is_cancelled) {
            handler.on_error(LLMError::aborted().with_context(context));
            return;
        }

        let prepared = self
            .formatter
            .format_request(request, true)
            .and_then(|body| self.post_request(self.stream_url(), &body));
        let http = match prepared {
            Ok(http) => http,
            Err(err) => {
                handler.on_error(err.with_context(context));
                return;
            }
        };

        debug!(provider = %self.provider, endpoint = %self.endpoints.chat, "sending streaming chat request");
        let outcome = match until_cancelled(token, self.transport.send_stream(http)).await {
            None => Err(LLMError::aborted()),
            Some(Err(err)) => {
                // No response object: the only case where a non-streaming retry is safe.
                debug!(provider = %self.provider, error = %err, "stream transport failed, falling back");
                self.fallback(request, handler, token).await
            }
            Some(Ok(response)) if !response.is_success() => {
                let status = response.status;
                match until_cancelled(token, collect_body(response.body)).await {
                    None => Err(LLMError::aborted()),
                    Some(body) => Err(classify_response(status, &body)),
                }
            }
            Some(Ok(response)) => self.read_stream(response, handler, token).await,
        };

        // A cancel fired from the last on_data still wins over completion.
        let outcome = match outcome {
            Ok(()) if token.is_some_and(CancellationToken::is_cancelled) => Err(LLMError::aborted()),
            other => other,
        };

        match outcome {
            Ok(()) => handler.on_complete(),
            Err(err) => {
                let err = err.with_context(context);
                if !err.is_aborted() {
                    warn!(provider = %self.provider, kind = %err.kind(), error = %err, "streaming chat failed");
                }
                handler.on_error(err);
            }
        }
    }

    async fn get_models(&self) -> Vec<ModelInfo> {
        match self.fetch_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!(provider = %self.provider, endpoint = %self.endpoints.models, error = %err, "failed to list models");
                Vec::new()
            }
        }
    }

    async fn test_connection(&self) -> ClientResponse<ConnectionStatus> {
        match with_retry(|| self.probe(), &self.retry).await {
            Ok(()) => ClientResponse::ok(ConnectionStatus {
                success: true,
                message: format!("connected to {}", self.provider),
            }),
            Err(err) => {
                let err = err.with_context(self.context(&self.endpoints.models));
                warn!(provider = %self.provider, kind = %err.kind(), "connection test failed");
                ClientResponse::failed(
                    ConnectionStatus {
                        success: false,
                        message: err.message().to_string(),
                    },
                    err,
                )
            }
        }
    }
}

impl fmt::Debug for UnifiedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("endpoints", &self.endpoints)
            .field("auth", &self.auth)
            .field("formatter", &self.formatter)
            .field("parser", &self.parser)
            .finish()
    }
}

/// Runs `future` unless `token` fires first; `None` means cancelled.
async fn until_cancelled<F: Future>(
    token: Option<&CancellationToken>,
    future: F,
) -> Option<F::Output> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            output = future => Some(output),
        },
        None => Some(future.await),
    }
}

/// Drains an error body for classification; read failures keep what arrived so far.
async fn collect_body(mut body: HttpBodyStream) -> String {
    let mut bytes = Vec::new();
    while let Some(Ok(chunk)) = body.next().await {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Sniffs the model-list shapes in order: bare array, `data`, `models`, then the first
/// field holding an array of objects with `id` or `name`.
fn parse_model_list(value: &Value) -> Option<Vec<ModelInfo>> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(object) => {
            if let Some(Value::Array(entries)) = object.get("data") {
                entries
            } else if let Some(Value::Array(entries)) = object.get("models") {
                entries
            } else {
                object.values().find_map(|field| match field {
                    Value::Array(entries)
                        if entries.first().is_some_and(|first| {
                            first.get("id").is_some() || first.get("name").is_some()
                        }) =>
                    {
                        Some(entries)
                    }
                    _ => None,
                })?
            }
        }
        _ => return None,
    };
    Some(entries.iter().filter_map(model_info).collect())
}

fn model_info(entry: &Value) -> Option<ModelInfo> {
    if let Some(id) = entry.as_str() {
        return Some(ModelInfo {
            id: id.to_string(),
            name: None,
        });
    }
    let text = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
    let id = text("id").or_else(|| text("name")).or_else(|| text("model"))?;
    let name = text("display_name")
        .or_else(|| text("displayName"))
        .or_else(|| text("name"));
    Some(ModelInfo { id, name })
}
