//! Deadline handling for lifecycle operations.

use std::future::Future;
use std::time::Duration;

use crate::error::StopCause;

/// Await `operation` for at most `timeout`.
///
/// The deadline is hard: on expiry the operation is dropped and a
/// `StopCause::Timeout` is returned. Nothing is retried.
pub async fn with_timeout<F, T>(timeout: Duration, operation: F) -> Result<T, StopCause>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| StopCause::Timeout { after: timeout })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(5), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(
            result,
            Err(StopCause::Timeout {
                after: Duration::from_millis(20)
            })
        );
    }
}
