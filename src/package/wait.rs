use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::{PackageError, Result};
use crate::ui::prelude::*;

/// Fixed-interval polling budget for wait steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 10,
        }
    }
}

/// Poll `check` until it returns true, the attempt budget runs out, or the
/// token is cancelled.
pub async fn wait_until<F>(
    policy: WaitPolicy,
    token: &CancellationToken,
    what: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> bool,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if token.is_cancelled() {
            return Err(PackageError::Cancelled);
        }
        if check() {
            return Ok(());
        }
        if attempt == attempts {
            break;
        }

        emit(
            Level::Debug,
            "package.wait",
            &format!("Waiting for {} ({}/{})", what, attempt, attempts),
            None,
        );
        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = token.cancelled() => return Err(PackageError::Cancelled),
        }
    }

    Err(PackageError::Timeout {
        what: what.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_millis(1),
            attempts: 4,
        }
    }

    #[tokio::test]
    async fn test_wait_succeeds_when_condition_turns_true() {
        let mut calls = 0;
        wait_until(fast(), &CancellationToken::new(), "file", || {
            calls += 1;
            calls == 3
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_wait_times_out_after_budget() {
        let mut calls = 0;
        let err = wait_until(fast(), &CancellationToken::new(), "service 'nginx'", || {
            calls += 1;
            false
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 4);
        assert_eq!(
            err.to_string(),
            "timed out waiting for service 'nginx' after 4 attempts"
        );
    }

    #[tokio::test]
    async fn test_wait_honours_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wait_until(fast(), &token, "file", || false).await.unwrap_err();
        assert!(matches!(err, PackageError::Cancelled));
    }
}
