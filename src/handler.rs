use tokio_util::sync::CancellationToken;

use crate::error::LLMError;

/// Receives the output of [`crate::client::LLMClient::stream_chat`].
///
/// Handlers are borrowed for one call only. For a given call `on_data` fires zero or more
/// times in arrival order, followed by exactly one of `on_complete` or `on_error`.
pub trait StreamHandler: Send {
    fn on_data(&mut self, chunk: &str);

    fn on_error(&mut self, error: LLMError);

    fn on_complete(&mut self) {}

    /// Token checked before sending and at every read boundary.
    fn cancellation_token(&self) -> Option<CancellationToken> {
        None
    }
}

type DataCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type ErrorCallback<'a> = Box<dyn FnMut(LLMError) + Send + 'a>;
type CompleteCallback<'a> = Box<dyn FnMut() + Send + 'a>;

/// 基于闭包的 StreamHandler
///
/// # Examples
///
/// ```
/// use unillm::handler::{CallbackHandler, StreamHandler};
///
/// let mut text = String::new();
/// {
///     let mut handler = CallbackHandler::new(|chunk| text.push_str(chunk), |_err| {});
///     handler.on_data("Hel");
///     handler.on_data("lo");
///     handler.on_complete();
/// }
/// assert_eq!(text, "Hello");
/// ```
pub struct CallbackHandler<'a> {
    on_data: DataCallback<'a>,
    on_error: ErrorCallback<'a>,
    on_complete: Option<CompleteCallback<'a>>,
    token: Option<CancellationToken>,
}

impl<'a> CallbackHandler<'a> {
    pub fn new<D, E>(on_data: D, on_error: E) -> Self
    where
        D: FnMut(&str) + Send + 'a,
        E: FnMut(LLMError) + Send + 'a,
    {
        Self {
            on_data: Box::new(on_data),
            on_error: Box::new(on_error),
            on_complete: None,
            token: None,
        }
    }

    pub fn with_on_complete<C>(mut self, on_complete: C) -> Self
    where
        C: FnMut() + Send + 'a,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

impl StreamHandler for CallbackHandler<'_> {
    fn on_data(&mut self, chunk: &str) {
        (self.on_data)(chunk);
    }

    fn on_error(&mut self, error: LLMError) {
        (self.on_error)(error);
    }

    fn on_complete(&mut self) {
        if let Some(on_complete) = self.on_complete.as_mut() {
            on_complete();
        }
    }

    fn cancellation_token(&self) -> Option<CancellationToken> {
        self.token.clone()
    }
}
