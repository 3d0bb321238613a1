/// Deadline wrapper for fallible async operations
use crate::metrics::TimeoutMetrics;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Run `future` with a deadline, keeping the operation's own error type
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(Ok(result)) => {
            TimeoutMetrics::record_operation("success");
            Ok(result)
        }
        Ok(Err(e)) => {
            TimeoutMetrics::record_operation("failure");
            Err(TimeoutError::OperationFailed(e))
        }
        Err(_) => {
            TimeoutMetrics::record_operation("elapsed");
            Err(TimeoutError::Elapsed(duration))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>(42)
        })
        .await;

        assert!(matches!(result, Err(TimeoutError::Elapsed(d)) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_timeout_keeps_operation_error() {
        let result =
            with_timeout(Duration::from_secs(1), async { Err::<i32, _>("disk full") }).await;

        assert!(matches!(result, Err(TimeoutError::OperationFailed("disk full"))));
    }
}
