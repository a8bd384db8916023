//! Bulkhead: a semaphore capping concurrent calls to a remote target.
//!
//! Callers wait for a permit rather than being rejected; an outer timeout
//! bounds the total wait-plus-call budget.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Error from a bulkhead-guarded call.
#[derive(Error, Debug)]
pub enum BulkheadError<E> {
    /// The bulkhead was closed while waiting for a permit.
    #[error("bulkhead is closed")]
    Closed,
    /// Operation failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

/// Concurrency cap around a remote target.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a bulkhead allowing `max_concurrent` in-flight calls.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured concurrency cap.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run an operation once a permit is available.
    ///
    /// # Errors
    ///
    /// Returns [`BulkheadError::Inner`] when the operation fails, or
    /// [`BulkheadError::Closed`] if the semaphore was closed.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BulkheadError::Closed)?;
        operation().await.map_err(BulkheadError::Inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn caps_concurrency() {
        let bulkhead = Bulkhead::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bulkhead = bulkhead.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                bulkhead
                    .call(|| async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(bulkhead.available(), 2);
    }

    #[tokio::test]
    async fn propagates_inner_error() {
        let bulkhead = Bulkhead::new(1);
        let result = bulkhead.call(|| async { Err::<i32, _>("boom") }).await;
        assert!(matches!(result, Err(BulkheadError::Inner("boom"))));
    }
}
