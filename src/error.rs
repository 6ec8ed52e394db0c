use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Stable classification of every failure surfaced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unreachable host, timeout, 404 or 5xx.
    Connection,
    /// Rejected or missing credentials.
    Auth,
    /// Quota exhausted or request rate throttled.
    Quota,
    /// Caller-side payload defect (400/422) or a formatter failure.
    RequestFormat,
    /// Well-formed transport response that matches no known provider shape.
    ResponseParse,
    /// Anything the classifier could not place.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Auth => "auth",
            ErrorKind::Quota => "quota",
            ErrorKind::RequestFormat => "request_format",
            ErrorKind::ResponseParse => "response_parse",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context attached to an [`LLMError`].
///
/// Every field is optional because failures can happen before a provider or endpoint is
/// known (for example while formatting a request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub endpoint: Option<String>,
    /// HTTP status of the response that produced the error, if any.
    pub status: Option<u16>,
}

impl ErrorContext {
    /// Fills every unset field from `other`, keeping the fields already present.
    fn merge(&mut self, other: ErrorContext) {
        if self.provider.is_none() {
            self.provider = other.provider;
        }
        if self.model.is_none() {
            self.model = other.model;
        }
        if self.base_url.is_none() {
            self.base_url = other.base_url;
        }
        if self.endpoint.is_none() {
            self.endpoint = other.endpoint;
        }
        if self.status.is_none() {
            self.status = other.status;
        }
    }
}

/// Aggregates every failure mode exposed by the unified LLM client.
///
/// The variant is the error's [`ErrorKind`]; callers use it to decide whether to retry,
/// re-prompt for credentials, or surface an actionable message. Values are never mutated
/// after construction: [`LLMError::with_context`] consumes and returns a new error.
#[derive(Debug, Clone, Error)]
pub enum LLMError {
    /// Represents transport-layer or networking failures, including caller cancellation.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        context: ErrorContext,
        /// Set when the failure is the caller cancelling an in-flight request.
        aborted: bool,
    },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth {
        message: String,
        context: ErrorContext,
    },
    /// Indicates that the provider throttled the request or the account ran out of quota.
    #[error("quota exceeded: {message}")]
    Quota {
        message: String,
        context: ErrorContext,
    },
    /// Signals a malformed request payload.
    #[error("invalid request: {message}")]
    RequestFormat {
        message: String,
        context: ErrorContext,
    },
    /// Signals a response body that none of the parsers understood.
    #[error("failed to parse response: {message}")]
    ResponseParse {
        message: String,
        context: ErrorContext,
    },
    /// Catches opaque or unexpected failures.
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        context: ErrorContext,
    },
}

impl LLMError {
    /// Builds an error of the given kind with an empty context.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::{ErrorKind, LLMError};
    ///
    /// let err = LLMError::new(ErrorKind::Quota, "slow down");
    /// assert_eq!(err.kind(), ErrorKind::Quota);
    /// assert_eq!(err.message(), "slow down");
    /// ```
    pub fn new<T: Into<String>>(kind: ErrorKind, message: T) -> Self {
        let message = message.into();
        let context = ErrorContext::default();
        match kind {
            ErrorKind::Connection => Self::Connection {
                message,
                context,
                aborted: false,
            },
            ErrorKind::Auth => Self::Auth { message, context },
            ErrorKind::Quota => Self::Quota { message, context },
            ErrorKind::RequestFormat => Self::RequestFormat { message, context },
            ErrorKind::ResponseParse => Self::ResponseParse { message, context },
            ErrorKind::Unknown => Self::Unknown { message, context },
        }
    }

    /// Creates an [`LLMError::Connection`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::connection("dns lookup failed");
    /// assert!(matches!(err, LLMError::Connection { aborted: false, .. }));
    /// ```
    pub fn connection<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn auth<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn request_format<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::RequestFormat, message)
    }

    pub fn response_parse<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::ResponseParse, message)
    }

    /// Connection error reported when the caller cancels an in-flight request.
    pub fn aborted() -> Self {
        Self::Connection {
            message: "request aborted".to_string(),
            context: ErrorContext::default(),
            aborted: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Quota { .. } => ErrorKind::Quota,
            Self::RequestFormat { .. } => ErrorKind::RequestFormat,
            Self::ResponseParse { .. } => ErrorKind::ResponseParse,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// The original, human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. }
            | Self::Auth { message, .. }
            | Self::Quota { message, .. }
            | Self::RequestFormat { message, .. }
            | Self::ResponseParse { message, .. }
            | Self::Unknown { message, .. } => message,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Connection { context, .. }
            | Self::Auth { context, .. }
            | Self::Quota { context, .. }
            | Self::RequestFormat { context, .. }
            | Self::ResponseParse { context, .. }
            | Self::Unknown { context, .. } => context,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.context().status
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Connection { aborted: true, .. })
    }

    /// Returns the error with `context` merged in; fields already set are kept.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context_mut().merge(context);
        self
    }

    fn with_status(mut self, status: u16) -> Self {
        self.context_mut().status = Some(status);
        self
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Connection { context, .. }
            | Self::Auth { context, .. }
            | Self::Quota { context, .. }
            | Self::RequestFormat { context, .. }
            | Self::ResponseParse { context, .. }
            | Self::Unknown { context, .. } => context,
        }
    }
}

/// Raw failure handed to [`classify`].
#[derive(Debug)]
pub enum Failure<'a> {
    /// A failure that already went through classification.
    Classified(LLMError),
    /// The request never produced an HTTP response.
    NoResponse { message: String },
    /// The server answered with a status the caller treats as a failure.
    Response { status: u16, body: &'a str },
}

impl From<LLMError> for Failure<'_> {
    fn from(error: LLMError) -> Self {
        Failure::Classified(error)
    }
}

const QUOTA_HINTS: [&str; 5] = [
    "quota",
    "credit",
    "rate limit",
    "too many requests",
    "exceeded",
];

const AUTH_HINTS: [&str; 4] = ["api key", "api_key", "unauthorized", "authentication"];

/// Maps a raw transport or HTTP failure onto the [`ErrorKind`] taxonomy.
///
/// Precedence: already-classified errors pass through, missing responses are connection
/// failures, well-known statuses map to a fixed kind regardless of body, and only other
/// statuses fall back to sniffing the body for quota and credential hints.
///
/// # Examples
///
/// ```
/// use unillm::error::{classify, ErrorKind, Failure};
///
/// let err = classify(Failure::Response {
///     status: 401,
///     body: r#"{"error":{"message":"Incorrect API key provided"}}"#,
/// });
/// assert_eq!(err.kind(), ErrorKind::Auth);
/// assert_eq!(err.message(), "Incorrect API key provided");
/// assert_eq!(err.status(), Some(401));
/// ```
pub fn classify(failure: Failure<'_>) -> LLMError {
    let (status, body) = match failure {
        Failure::Classified(error) => return error,
        Failure::NoResponse { message } => {
            let message = if message.trim().is_empty() {
                "network connection failed".to_string()
            } else {
                message
            };
            return LLMError::connection(message);
        }
        Failure::Response { status, body } => (status, body),
    };

    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = extract_message(status, body, parsed.as_ref());

    let kind = match status {
        400 | 422 => ErrorKind::RequestFormat,
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::Connection,
        429 => ErrorKind::Quota,
        500..=504 => ErrorKind::Connection,
        _ if looks_like_quota(&message, parsed.as_ref()) => ErrorKind::Quota,
        _ if looks_like_auth(&message, parsed.as_ref()) => ErrorKind::Auth,
        _ => ErrorKind::Unknown,
    };

    LLMError::new(kind, message).with_status(status)
}

/// Shorthand for classifying an HTTP response body.
pub fn classify_response(status: u16, body: &str) -> LLMError {
    classify(Failure::Response { status, body })
}

fn extract_message(status: u16, body: &str, parsed: Option<&Value>) -> String {
    match parsed {
        Some(value) => {
            let candidates = [
                value.pointer("/error/message"),
                value.get("message"),
                value.get("error"),
            ];
            candidates
                .into_iter()
                .flatten()
                .find_map(|candidate| candidate.as_str())
                .or_else(|| value.as_str())
                .filter(|message| !message.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"))
        }
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!("HTTP {status}"),
    }
}

fn looks_like_quota(message: &str, parsed: Option<&Value>) -> bool {
    let lower = message.to_ascii_lowercase();
    if QUOTA_HINTS.iter().any(|needle| lower.contains(needle)) {
        return true;
    }
    parsed.is_some_and(|value| {
        value.pointer("/error/code").and_then(Value::as_u64) == Some(429)
            || value.pointer("/error/status").and_then(Value::as_str)
                == Some("RESOURCE_EXHAUSTED")
    })
}

fn looks_like_auth(message: &str, parsed: Option<&Value>) -> bool {
    let lower = message.to_ascii_lowercase();
    if AUTH_HINTS.iter().any(|needle| lower.contains(needle)) {
        return true;
    }
    parsed.is_some_and(|value| {
        value.pointer("/error/details/0/reason").and_then(Value::as_str) == Some("API_KEY_INVALID")
    })
}
