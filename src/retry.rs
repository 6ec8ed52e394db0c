use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{ErrorKind, LLMError};

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// 不重试的策略
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay slept after the failed attempt number `attempt` (zero based).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use unillm::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
    /// assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(0.0).powi(attempt as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.round() as u64)
    }
}

/// Errors that retrying cannot fix: bad credentials, malformed requests and 404s.
pub fn is_permanent(error: &LLMError) -> bool {
    matches!(error.kind(), ErrorKind::Auth | ErrorKind::RequestFormat) || error.status() == Some(404)
}

/// Runs `operation` until it succeeds, the error is permanent, or retries run out.
///
/// Only use this for idempotent calls; chat generation is never retried.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use unillm::error::LLMError;
/// use unillm::retry::{with_retry, RetryPolicy};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let calls = AtomicUsize::new(0);
/// let policy = RetryPolicy { max_retries: 2, initial_delay: Duration::from_millis(1), multiplier: 2.0 };
/// let result = with_retry(
///     || async {
///         if calls.fetch_add(1, Ordering::SeqCst) == 0 {
///             Err(LLMError::connection("flaky"))
///         } else {
///             Ok("pong")
///         }
///     },
///     &policy,
/// )
/// .await;
/// assert_eq!(result.unwrap(), "pong");
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// # });
/// ```
pub async fn with_retry<T, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_retries || is_permanent(&error) {
                    return Err(error);
                }
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = %error.kind(),
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::classify_response;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.5,
        }
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit() {
        for error in [
            classify_response(401, "bad key"),
            classify_response(400, "bad payload"),
            classify_response(404, "no such route"),
        ] {
            let calls = AtomicUsize::new(0);
            let result: Result<(), _> = with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let error = error.clone();
                    async move { Err(error) }
                },
                &fast_policy(3),
            )
            .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{error:?}");
        }
    }

    #[tokio::test]
    async fn transient_errors_use_every_attempt() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(classify_response(503, "busy")) }
            },
            &fast_policy(3),
        )
        .await;

        match result {
            Err(LLMError::Connection { context, .. }) => assert_eq!(context.status, Some(503)),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LLMError::connection("down")) }
            },
            &RetryPolicy::none(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }
}
