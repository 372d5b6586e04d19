//! Attempt strategy and error classification, spec.md §4.2.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct AttemptStrategy {
    pub attempts: u32,
    pub attempt_interval: Duration,
}

impl Default for AttemptStrategy {
    fn default() -> Self {
        AttemptStrategy {
            attempts: 3,
            attempt_interval: Duration::from_secs(1),
        }
    }
}

/// Server messages known to be transient. Anything else is non-recoverable.
const RECOVERABLE_MESSAGES: &[&str] = &["service timeout", "service unavailable", "context deadline exceeded"];

#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("graphql error: {0}")]
    Graphql(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl AttemptError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            AttemptError::Transport(_) => true,
            AttemptError::Graphql(msg) => RECOVERABLE_MESSAGES
                .iter()
                .any(|known| msg.eq_ignore_ascii_case(known)),
            AttemptError::Parse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{operation} failed after {} attempts: {}", .errors.len(), summarize(&.errors))]
pub struct RetryError {
    pub operation: &'static str,
    pub errors: Vec<AttemptError>,
}

fn summarize(errors: &[AttemptError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run `attempt` up to `strategy.attempts` times, sleeping
/// `attempt_interval` between tries, stopping early on a non-recoverable
/// error. Bundles every attempt's error into [`RetryError`] on exhaustion.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    strategy: AttemptStrategy,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptError>>,
{
    let mut errors = Vec::new();
    for attempt_no in 0..strategy.attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt_no + 1 == strategy.attempts;
                let recoverable = err.is_recoverable();
                errors.push(err);
                if recoverable && !is_last {
                    tokio::time::sleep(strategy.attempt_interval).await;
                    continue;
                }
                break;
            }
        }
    }
    Err(RetryError { operation, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_one_recoverable_failure() {
        let calls = AtomicU32::new(0);
        let strategy = AttemptStrategy {
            attempts: 3,
            attempt_interval: Duration::from_millis(1),
        };
        let result = with_retry("op", strategy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AttemptError::Graphql("service timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_all_attempts_on_persistent_transport_failure() {
        let strategy = AttemptStrategy {
            attempts: 3,
            attempt_interval: Duration::from_millis(1),
        };
        let result: Result<(), RetryError> = with_retry("op", strategy, || async {
            Err(AttemptError::Transport("timeout".into()))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.errors.len(), 3);
    }

    #[tokio::test]
    async fn non_recoverable_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let strategy = AttemptStrategy {
            attempts: 3,
            attempt_interval: Duration::from_millis(1),
        };
        let result: Result<(), RetryError> = with_retry("op", strategy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Graphql("not authorized".into())) }
        })
        .await;
        assert_eq!(result.unwrap_err().errors.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
