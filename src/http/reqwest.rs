use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::debug;

use crate::config::{CONTENT_TYPE_JSON, CONTENT_TYPE_SSE};
use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// User agent sent by [`ReqwestTransport::default_client`].
pub const USER_AGENT: &str = concat!("unillm/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// 基于 reqwest 的默认 HttpTransport
///
/// Per-request timeouts come from [`HttpRequest::timeout`]; the shared client only bounds
/// connection setup.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用自定义 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with the crate user agent and a 30 second connect timeout.
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::connection(format!("failed to create reqwest client: {err}")))
    }

    fn prepare(&self, request: HttpRequest, streaming: bool) -> Result<reqwest::RequestBuilder, LLMError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut headers = to_header_map(&request.headers)?;
        if streaming && !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, stream_accept());
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder)
    }

    async fn execute(&self, request: HttpRequest, streaming: bool) -> Result<reqwest::Response, LLMError> {
        let url = request.url.clone();
        let response = self
            .prepare(request, streaming)?
            .send()
            .await
            .map_err(|err| {
                debug!(%url, error = %err, "request did not produce a response");
                connection_error(&err)
            })?;
        debug!(%url, status = response.status().as_u16(), streaming, "response received");
        Ok(response)
    }
}

/// Accept header for streaming calls whose caller did not pick one.
fn stream_accept() -> HeaderValue {
    let value = format!("{CONTENT_TYPE_SSE}, {CONTENT_TYPE_NDJSON}, {CONTENT_TYPE_JSON}");
    HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static(CONTENT_TYPE_SSE))
}

fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, LLMError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LLMError::request_format(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| LLMError::request_format(format!("invalid value for header {name}: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Response headers keyed by lower-case name; non-UTF-8 values are dropped.
fn from_header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn connection_error(err: &reqwest::Error) -> LLMError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("failed to connect: {err}")
    } else if err.is_body() || err.is_decode() {
        format!("response body interrupted: {err}")
    } else {
        err.to_string()
    };
    LLMError::connection(message)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self.execute(request, false).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| connection_error(&err))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self.execute(request, true).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body: HttpBodyStream = Box::pin(response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(err) => Err(connection_error(&err)),
        }));

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 便捷构造线程安全 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
