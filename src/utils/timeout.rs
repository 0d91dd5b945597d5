//! Timeout utilities for browser operations.
//!
//! Provides async timeout wrappers to prevent indefinite hangs during
//! page navigation, loading, and other CDP round-trips.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Wrap an async browser operation with an explicit timeout.
///
/// Returns error messages distinguishing between timeout and operation
/// failures; the "timeout" token in the message is what the error
/// classifier keys on.
pub async fn with_op_timeout<F, T>(operation: F, timeout: Duration, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "{operation_name} timeout after {:.1} seconds",
            timeout.as_secs_f64()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let result =
            with_op_timeout(async { Ok(7) }, Duration::from_millis(50), "Quick op").await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn reports_timeout_with_name() {
        let result: Result<()> = with_op_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(20),
            "Slow op",
        )
        .await;
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("Slow op timeout"));
    }
}
