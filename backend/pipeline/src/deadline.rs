use std::future::Future;
use std::time::Duration;

use lessonkit_core::LlmError;

/// Default deadline for quick v1 operations.
pub const SHORT_DEADLINE: Duration = Duration::from_secs(70);
/// Default deadline for v1 parse and check and every v2 operation.
pub const LONG_DEADLINE: Duration = Duration::from_secs(180);

/// Run `fut` under a deadline. On expiry the future is dropped, which aborts
/// any in-flight HTTP call, and `Timeout` is returned.
pub async fn run_with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_operations_time_out() {
        let result: Result<(), LlmError> = run_with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn fast_operations_pass_through() {
        let value = run_with_deadline(Duration::from_secs(1), async { Ok::<_, LlmError>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }
}
