//! Request-scoped cancellation.
//!
//! Workers poll [`CancellationToken::is_cancelled`] before each unit of
//! work; nothing is interrupted mid-sequence.

use std::time::Duration;
use tokio::task::JoinHandle;

pub use tokio_util::sync::{CancellationToken, DropGuard};

/// Cancels a token once a request deadline passes.
///
/// The timer is aborted when stopped or dropped, leaving the token as is.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: Option<JoinHandle<()>>,
}

impl DeadlineTimer {
    /// Arm a timer for `timeout`. A zero timeout cancels immediately; `None`
    /// arms nothing. Must be called inside a tokio runtime.
    pub fn start(token: &CancellationToken, timeout: Option<Duration>) -> Self {
        let handle = match timeout {
            None => None,
            Some(timeout) if timeout.is_zero() => {
                token.cancel();
                None
            }
            Some(timeout) => {
                let token = token.clone();
                Some(tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(timeout) => {
                            tracing::debug!(?timeout, "Request deadline reached");
                            token.cancel();
                        }
                    }
                }))
            }
        };
        Self { handle }
    }

    /// Timer from an optional timeout in milliseconds.
    pub fn from_timeout_ms(token: &CancellationToken, timeout_ms: Option<u64>) -> Self {
        Self::start(token, timeout_ms.map(Duration::from_millis))
    }

    /// Disarm the timer.
    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_timeout_cancels_immediately() {
        let token = CancellationToken::new();
        let _timer = DeadlineTimer::from_timeout_ms(&token, Some(0));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_cancels_token() {
        let token = CancellationToken::new();
        let _timer = DeadlineTimer::from_timeout_ms(&token, Some(10));
        assert!(!token.is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_stopped_timer_leaves_token_alone() {
        let token = CancellationToken::new();
        DeadlineTimer::from_timeout_ms(&token, Some(10)).stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_timeout_arms_nothing() {
        let token = CancellationToken::new();
        let timer = DeadlineTimer::from_timeout_ms(&token, None);
        assert!(timer.handle.is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_drop_guard_cancels_clones() {
        let token = CancellationToken::new();
        let worker = token.clone();
        {
            let _guard = token.clone().drop_guard();
        }
        assert!(worker.is_cancelled());
    }
}
