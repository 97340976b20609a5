//! Delayed re-attempts.

use mobisync_protocol::OperationId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Schedules retries on the tokio runtime.
///
/// At most one timer is pending per operation: scheduling again aborts the
/// previous timer. Delays are clamped to a ceiling.
#[derive(Debug)]
pub struct RetryScheduler {
    timers: Arc<Mutex<HashMap<OperationId, Timer>>>,
    generation: AtomicU64,
    ceiling: Duration,
}

impl RetryScheduler {
    /// Creates a scheduler whose delays never exceed `ceiling`.
    pub fn new(ceiling: Duration) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            ceiling,
        }
    }

    /// Runs `callback` after `delay`, replacing any timer already pending for
    /// the operation.
    ///
    /// Returns the effective delay. Must be called from within a tokio
    /// runtime.
    pub fn schedule<F>(&self, operation_id: OperationId, delay: Duration, callback: F) -> Duration
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = delay.min(self.ceiling);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Hold the map lock across the spawn so the task cannot observe the
        // map before its own entry is inserted.
        let mut map = self.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = timers.lock();
                match map.get(&operation_id) {
                    Some(timer) if timer.generation == generation => {
                        map.remove(&operation_id);
                    }
                    _ => return,
                }
            }
            callback.await;
        });

        if let Some(previous) = map.insert(operation_id, Timer { generation, handle }) {
            previous.handle.abort();
            debug!(operation_id = %operation_id, "retry rescheduled");
        }
        debug!(operation_id = %operation_id, delay_ms = delay.as_millis() as u64, "retry scheduled");
        delay
    }

    /// Cancels the pending timer for an operation.
    ///
    /// Returns true if a timer was pending.
    pub fn cancel(&self, operation_id: OperationId) -> bool {
        match self.timers.lock().remove(&operation_id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(operation_id = %operation_id, "retry cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns true if a timer is pending for the operation.
    pub fn is_scheduled(&self, operation_id: OperationId) -> bool {
        self.timers.lock().contains_key(&operation_id)
    }

    /// Returns the number of pending timers.
    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let scheduler = RetryScheduler::new(Duration::from_secs(60));
        let fired = counter();

        scheduler.schedule(OperationId(1), Duration::from_secs(5), bump(&fired));
        assert!(scheduler.is_scheduled(OperationId(1)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(OperationId(1)));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let scheduler = RetryScheduler::new(Duration::from_secs(60));
        let first = counter();
        let second = counter();

        scheduler.schedule(OperationId(1), Duration::from_secs(5), bump(&first));
        scheduler.schedule(OperationId(1), Duration::from_secs(10), bump(&second));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_callback() {
        let scheduler = RetryScheduler::new(Duration::from_secs(60));
        let fired = counter();

        scheduler.schedule(OperationId(7), Duration::from_secs(1), bump(&fired));
        assert!(scheduler.cancel(OperationId(7)));
        assert!(!scheduler.cancel(OperationId(7)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_clamped_to_ceiling() {
        let scheduler = RetryScheduler::new(Duration::from_secs(2));
        let fired = counter();

        let effective = scheduler.schedule(OperationId(3), Duration::from_secs(3600), bump(&fired));
        assert_eq!(effective, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_operations() {
        let scheduler = RetryScheduler::new(Duration::from_secs(60));
        let fired = counter();

        scheduler.schedule(OperationId(1), Duration::from_secs(1), bump(&fired));
        scheduler.schedule(OperationId(2), Duration::from_secs(2), bump(&fired));
        scheduler.cancel(OperationId(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
