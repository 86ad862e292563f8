//! Bounded retry around a single delivery attempt.
//!
//! Errors are split into two classes:
//! - terminal: the request could not be built or the payload could not be
//!   rendered. Repeating the attempt cannot change the outcome.
//! - retryable: transport failures and responses with status >= 400.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Total attempts (1 initial + 2 retries).
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Failure of a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("rendering payload: {0}")]
    Render(#[source] handlebars::RenderError),

    #[error("building request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("sending request: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("request unsuccessful: destination responded with {0}")]
    Status(StatusCode),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport(_) | DeliveryError::Status(_))
    }
}

/// The last error of a delivery that did not succeed.
#[derive(Debug, Error)]
#[error("delivery failed after {attempts} attempt(s): {error}")]
pub struct DeliveryFailure {
    pub attempts: u32,
    #[source]
    pub error: DeliveryError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `attempts` counts the initial try; values below 1 are raised to 1.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `attempt` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    ///
    /// `attempt` receives the 1-based attempt number. `on_retry` fires after
    /// every retryable failure that will be followed by another attempt; it
    /// only observes and cannot change the outcome.
    ///
    /// Returns the number of attempts used on success.
    pub async fn run<F, Fut, R>(&self, mut attempt: F, mut on_retry: R) -> Result<u32, DeliveryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
        R: FnMut(u32, &DeliveryError),
    {
        let mut number = 1;
        loop {
            match attempt(number).await {
                Ok(()) => return Ok(number),
                Err(error) if !error.is_retryable() || number >= self.attempts => {
                    return Err(DeliveryFailure {
                        attempts: number,
                        error,
                    });
                }
                Err(error) => {
                    on_retry(number, &error);
                    tokio::time::sleep(self.delay).await;
                    number += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A real render failure: strict mode with a missing field.
    fn render_error() -> DeliveryError {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(true);
        let err = registry
            .render_template("{{missing}}", &serde_json::json!({}))
            .unwrap_err();
        DeliveryError::Render(err)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(DEFAULT_ATTEMPTS, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_first_time() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                |_, _| panic!("no retry expected"),
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_one_failure() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result = fast_policy()
            .run(
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(DeliveryError::Status(StatusCode::INTERNAL_SERVER_ERROR))
                        } else {
                            Ok(())
                        }
                    }
                },
                |attempt, _| retries.push(attempt),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retries, vec![1]);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let failure = fast_policy()
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        // Distinct status per attempt so we can tell which one is surfaced
                        let status = StatusCode::from_u16(500 + attempt as u16).unwrap();
                        Err(DeliveryError::Status(status))
                    }
                },
                |attempt, error| retries.push((attempt, error.to_string())),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert!(matches!(
            failure.error,
            DeliveryError::Status(s) if s == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].0, 1);
        assert_eq!(retries[1].0, 2);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let failure = fast_policy()
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(render_error()) }
                },
                |_, _| panic!("terminal errors must not be retried"),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.error.is_retryable());
    }

    #[tokio::test]
    async fn test_terminal_error_after_retryable_one_stops() {
        let calls = AtomicU32::new(0);

        let failure = fast_policy()
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 1 {
                            Err(DeliveryError::Status(StatusCode::BAD_GATEWAY))
                        } else {
                            Err(render_error())
                        }
                    }
                },
                |_, _| {},
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(failure.error, DeliveryError::Render(_)));
    }

    #[test]
    fn test_attempts_never_below_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::default().attempts(), 3);
    }

    #[test]
    fn test_classification() {
        assert!(DeliveryError::Status(StatusCode::BAD_REQUEST).is_retryable());
        assert!(!render_error().is_retryable());
    }

    #[test]
    fn test_render_error_keeps_source() {
        let err = render_error();
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("rendering payload: "));
    }
}
