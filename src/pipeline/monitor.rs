//! Bounds the batch model call by a single timeout and a cancellation token

use crate::error::{PipelineError, StateName};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    timeout: Duration,
    cancel: CancellationToken,
}

impl ResourceMonitor {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `work` until it finishes, the timer fires, or the run is cancelled.
    ///
    /// On timeout or cancellation `work` is dropped and nothing it produced is kept.
    pub async fn guard<F, T>(&self, work: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let batch = self.cancel.child_token();
        tokio::select! {
            biased;
            _ = batch.cancelled() => Err(PipelineError::BatchProcessing {
                state: StateName::BatchProcess,
                source: anyhow::anyhow!("run cancelled"),
            }
            .into()),
            result = tokio::time::timeout(self.timeout, work) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    batch.cancel();
                    Err(PipelineError::BatchTimeout {
                        state: StateName::BatchProcess,
                        timeout: self.timeout,
                    }
                    .into())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_passes_through_results() {
        let monitor = ResourceMonitor::new(Duration::from_secs(1), CancellationToken::new());
        let value = monitor.guard(async { Ok::<_, anyhow::Error>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = monitor
            .guard(async { Err::<(), _>(anyhow::anyhow!("inner")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "inner");
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let monitor = ResourceMonitor::new(Duration::from_millis(20), CancellationToken::new());
        let err = monitor
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap_err();
        let typed = err.downcast::<PipelineError>().unwrap();
        assert!(typed.is_timeout());
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let token = CancellationToken::new();
        let monitor = ResourceMonitor::new(Duration::from_secs(5), token.clone());
        token.cancel();
        let err = monitor
            .guard(async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap_err();
        let typed = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(typed, PipelineError::BatchProcessing { .. }));
        assert!(monitor.is_cancelled());
    }
}
