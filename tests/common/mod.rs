#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use unillm::error::LLMError;
use unillm::handler::StreamHandler;
use unillm::http::{
    DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};

/// Scripted reply for `send_stream`.
pub enum StreamReply {
    /// Transport failed before a response object existed.
    Fail(LLMError),
    /// Response with the given status, content type and body pieces.
    Body {
        status: u16,
        content_type: Option<&'static str>,
        chunks: Vec<Result<Vec<u8>, LLMError>>,
        /// Keep the body open after the chunks instead of ending it.
        hang: bool,
    },
}

impl StreamReply {
    pub fn ok(content_type: &'static str, chunks: &[&str]) -> Self {
        StreamReply::Body {
            status: 200,
            content_type: Some(content_type),
            chunks: chunks.iter().map(|chunk| Ok(chunk.as_bytes().to_vec())).collect(),
            hang: false,
        }
    }
}

/// 按脚本返回响应的 Transport 并记录请求
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, LLMError>>>,
    stream_replies: Mutex<VecDeque<StreamReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_reply(&self, status: u16, body: &str) {
        self.replies
            .lock()
            .expect("lock")
            .push_back(Ok(json_response(status, body)));
    }

    pub fn push_failure(&self, error: LLMError) {
        self.replies.lock().expect("lock").push_back(Err(error));
    }

    pub fn push_stream(&self, reply: StreamReply) {
        self.stream_replies.lock().expect("lock").push_back(reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn request_body(&self, index: usize) -> serde_json::Value {
        let request = &self.requests()[index];
        serde_json::from_slice(request.body.as_deref().unwrap_or_default()).expect("JSON body")
    }

    pub fn dyn_transport(self: &Arc<Self>) -> DynHttpTransport {
        Arc::clone(self) as DynHttpTransport
    }
}

fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: body.as_bytes().to_vec(),
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::connection("no scripted reply")))
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.requests.lock().expect("lock").push(request);
        let reply = self
            .stream_replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| StreamReply::Fail(LLMError::connection("no scripted stream")));

        match reply {
            StreamReply::Fail(error) => Err(error),
            StreamReply::Body {
                status,
                content_type,
                chunks,
                hang,
            } => {
                let chunks = stream::iter(chunks);
                let body: HttpBodyStream = if hang {
                    Box::pin(futures_util::StreamExt::chain(chunks, stream::pending()))
                } else {
                    Box::pin(chunks)
                };
                let headers = content_type
                    .map(|value| HashMap::from([("content-type".to_string(), value.to_string())]))
                    .unwrap_or_default();
                Ok(HttpStreamResponse {
                    status,
                    headers,
                    body,
                })
            }
        }
    }
}

/// Collects every callback; optionally cancels its token after `cancel_after` chunks.
#[derive(Default)]
pub struct RecordingHandler {
    pub chunks: Vec<String>,
    pub errors: Vec<LLMError>,
    pub completed: usize,
    pub token: Option<CancellationToken>,
    pub cancel_after: Option<usize>,
}

impl RecordingHandler {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

impl StreamHandler for RecordingHandler {
    fn on_data(&mut self, chunk: &str) {
        self.chunks.push(chunk.to_string());
        if self.cancel_after == Some(self.chunks.len()) {
            if let Some(token) = &self.token {
                token.cancel();
            }
        }
    }

    fn on_error(&mut self, error: LLMError) {
        self.errors.push(error);
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }

    fn cancellation_token(&self) -> Option<CancellationToken> {
        self.token.clone()
    }
}
