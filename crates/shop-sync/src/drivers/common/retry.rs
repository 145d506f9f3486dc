//! Retry timing for connections and merge transactions.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, SyncError};

/// First connection backoff; doubles per failed attempt.
const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound for a single connection backoff.
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Delay before connection attempt `attempt + 1` (1-based `attempt`).
pub fn connect_backoff(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    CONNECT_BACKOFF_BASE
        .saturating_mul(factor)
        .min(CONNECT_BACKOFF_MAX)
}

/// Delay before merge retry `attempt` (1-based). Grows linearly.
pub fn merge_retry_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(attempt as u64))
}

/// Run `connect` up to `attempts` times with exponential backoff.
///
/// Only [`SyncError::Connection`] failures are retried; anything else is
/// returned immediately.
pub async fn connect_with_retry<T, F, Fut>(what: &str, attempts: u32, mut connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e @ SyncError::Connection { .. }) if attempt < attempts => {
                let delay = connect_backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_connect_backoff_doubles_and_caps() {
        assert_eq!(connect_backoff(1), Duration::from_millis(500));
        assert_eq!(connect_backoff(2), Duration::from_secs(1));
        assert_eq!(connect_backoff(3), Duration::from_secs(2));
        assert_eq!(connect_backoff(10), CONNECT_BACKOFF_MAX);
        assert_eq!(connect_backoff(u32::MAX), CONNECT_BACKOFF_MAX);
    }

    #[test]
    fn test_merge_retry_delay_is_linear() {
        assert_eq!(merge_retry_delay(200, 1), Duration::from_millis(200));
        assert_eq!(merge_retry_delay(200, 3), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let value = connect_with_retry("connecting", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::connection("refused", "test"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let err = connect_with_retry("connecting", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SyncError::connection("refused", "test")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Connection { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_with_retry_does_not_retry_config_errors() {
        let calls = AtomicU32::new(0);
        let err = connect_with_retry("connecting", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SyncError::Config("bad".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
