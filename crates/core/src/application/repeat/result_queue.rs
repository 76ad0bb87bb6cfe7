// Bounded result hand-off between a dispatcher and its worker tasks

use crate::application::stop::StopToken;
use crate::error::{BatchError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// Queue of results from in-flight work.
///
/// The dispatcher calls [`expect`](Self::expect) before handing work to a
/// worker; `expect` blocks while `throttle_limit` results are already
/// outstanding. Each worker calls [`put`](Self::put) exactly once, which
/// frees one throttle slot. [`take`](Self::take) blocks until a result is
/// available.
pub struct ResultQueue<T> {
    results: Mutex<VecDeque<T>>,
    throttle: Semaphore,
    available: Semaphore,
    outstanding: AtomicUsize,
}

impl<T: Send> ResultQueue<T> {
    pub fn new(throttle_limit: usize) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            throttle: Semaphore::new(throttle_limit.max(1)),
            available: Semaphore::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Announce that one more result will be `put`
    pub async fn expect(&self, stop: &StopToken) -> Result<()> {
        let mut stop = stop.clone();
        tokio::select! {
            biased;
            _ = stop.wait() => {
                return Err(BatchError::Interrupted(
                    "Interrupted while waiting for a free worker slot".to_string(),
                ));
            }
            permit = self.throttle.acquire() => {
                let permit = permit.map_err(|_| {
                    BatchError::Internal("Result queue throttle closed".to_string())
                })?;
                permit.forget();
            }
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Deliver one expected result
    pub fn put(&self, result: T) {
        self.lock().push_back(result);
        self.throttle.add_permits(1);
        self.available.add_permits(1);
    }

    /// Take the oldest delivered result, waiting for one if necessary
    pub async fn take(&self, stop: &StopToken) -> Result<T> {
        if !self.is_expecting() {
            return Err(BatchError::InvalidState(
                "take() called with no outstanding results".to_string(),
            ));
        }
        let mut stop = stop.clone();
        tokio::select! {
            biased;
            _ = stop.wait() => {
                return Err(BatchError::Interrupted(
                    "Interrupted while waiting for a result".to_string(),
                ));
            }
            permit = self.available.acquire() => {
                let permit = permit.map_err(|_| {
                    BatchError::Internal("Result queue closed".to_string())
                })?;
                permit.forget();
            }
        }
        let result = self
            .lock()
            .pop_front()
            .ok_or_else(|| BatchError::Internal("Result queue permit without result".to_string()))?;
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    /// No delivered result is waiting
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Some expected result has not been taken yet
    pub fn is_expecting(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stop::stop_channel;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_then_take_in_order() {
        let queue = ResultQueue::new(2);
        let stop = StopToken::never();
        assert!(!queue.is_expecting());

        queue.expect(&stop).await.unwrap();
        queue.expect(&stop).await.unwrap();
        queue.put(1);
        queue.put(2);
        assert!(!queue.is_empty());

        assert_eq!(queue.take(&stop).await.unwrap(), 1);
        assert_eq!(queue.take(&stop).await.unwrap(), 2);
        assert!(!queue.is_expecting());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_expect_blocks_at_throttle_limit() {
        let queue = Arc::new(ResultQueue::new(1));
        let stop = StopToken::never();
        queue.expect(&stop).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), queue.expect(&stop)).await;
        assert!(blocked.is_err(), "second expect should wait for a free slot");

        queue.put("done");
        tokio::time::timeout(Duration::from_secs(1), queue.expect(&stop))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_take_waits_for_put() {
        let queue = Arc::new(ResultQueue::new(4));
        let stop = StopToken::never();
        queue.expect(&stop).await.unwrap();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.put(7);
        });

        assert_eq!(queue.take(&stop).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_take_without_expect_is_rejected() {
        let queue: ResultQueue<i32> = ResultQueue::new(1);
        let result = queue.take(&StopToken::never()).await;
        assert!(matches!(result, Err(BatchError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_stop_interrupts_take() {
        let queue: ResultQueue<i32> = ResultQueue::new(1);
        let (signal, token) = stop_channel();
        queue.expect(&token).await.unwrap();
        signal.stop();
        let result = queue.take(&token).await;
        assert!(matches!(result, Err(BatchError::Interrupted(_))));
    }
}
