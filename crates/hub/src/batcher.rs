//! Ingest-side coalescer for high-rate `(key, event)` pairs. Shapes
//! what the hub receives from agent drivers before it ever reaches
//! `Hub::publish`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct BatcherStats {
    pub dropped_count: u64,
    pub queued: usize,
}

struct QueuedEvent<E> {
    key: String,
    event: E,
    enqueued_at: Instant,
}

struct BatcherState<E> {
    queue: VecDeque<QueuedEvent<E>>,
}

/// Coalesces per-key events within a debounce window, delivering batches
/// to `sink` on a fixed window or on manual `flush`. `sink` errors are
/// swallowed (logged) so one bad batch never stops later ones.
pub struct ThrottledBatcher<E: Clone + Send + 'static> {
    state: Arc<Mutex<BatcherState<E>>>,
    dropped_count: Arc<AtomicU64>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    batch_window: Duration,
    max_events_per_batch: usize,
    debounce: Duration,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    sink: Arc<dyn Fn(Vec<(String, E)>) + Send + Sync>,
}

impl<E: Clone + Send + 'static> ThrottledBatcher<E> {
    pub fn new(
        batch_window_ms: u64,
        max_events_per_batch: usize,
        debounce_ms: u64,
        sink: impl Fn(Vec<(String, E)>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(BatcherState { queue: VecDeque::new() })),
            dropped_count: Arc::new(AtomicU64::new(0)),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            batch_window: Duration::from_millis(batch_window_ms),
            max_events_per_batch,
            debounce: Duration::from_millis(debounce_ms),
            timer: Mutex::new(None),
            sink: Arc::new(sink),
        })
    }

    /// Enqueues `event` under `key`. Coalescing only applies within the
    /// `debounce` window: a same-key event that arrives while the prior one
    /// is still inside its debounce window overwrites it in place, but once
    /// `debounce` has elapsed since the prior value was recorded, that prior
    /// value is flushed to the sink on its own (a single-event batch,
    /// independent of the batch-window timer) before the new event starts a
    /// fresh coalescing window. Drops the oldest queued event (incrementing
    /// `dropped_count` by exactly one) if the queue is already at
    /// `max_events_per_batch`.
    pub async fn enqueue(self: &Arc<Self>, key: String, event: E) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut stale = None;
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            if let Some(idx) = state.queue.iter().position(|q| q.key == key) {
                if now.saturating_duration_since(state.queue[idx].enqueued_at) >= self.debounce {
                    let prior = state.queue.remove(idx).expect("index just found");
                    stale = Some((prior.key, prior.event));
                    state.queue.push_back(QueuedEvent { key, event, enqueued_at: now });
                } else {
                    let existing = &mut state.queue[idx];
                    existing.event = event;
                    existing.enqueued_at = now;
                }
            } else {
                if state.queue.len() >= self.max_events_per_batch {
                    state.queue.pop_front();
                    self.dropped_count.fetch_add(1, Ordering::SeqCst);
                }
                state.queue.push_back(QueuedEvent { key, event, enqueued_at: now });
            }
        }
        if let Some(item) = stale {
            self.deliver_batch(vec![item]);
        }
        self.ensure_timer();
    }

    fn deliver_batch(&self, batch: Vec<(String, E)>) {
        if batch.is_empty() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(batch)));
        if let Err(e) = result {
            tracing::error!(?e, "batcher sink panicked; swallowing so later batches still deliver");
        }
    }

    fn ensure_timer(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut guard = this.timer.lock().await;
            if guard.is_some() {
                return;
            }
            let inner = Arc::clone(&this);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(inner.batch_window).await;
                inner.flush().await;
                let mut t = inner.timer.lock().await;
                *t = None;
            });
            *guard = Some(handle);
        });
    }

    /// Delivers currently retained events to the sink, in insertion
    /// order, then clears the queue.
    pub async fn flush(self: &Arc<Self>) {
        let batch = {
            let mut state = self.state.lock().await;
            let batch: Vec<(String, E)> = state.queue.drain(..).map(|q| (q.key, q.event)).collect();
            batch
        };
        self.deliver_batch(batch);
    }

    /// Flushes synchronously and marks the batcher stopped; later
    /// `enqueue` calls become no-ops.
    pub async fn stop(self: &Arc<Self>) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
        self.flush().await;
    }

    pub async fn get_stats(&self) -> BatcherStats {
        let queued = self.state.lock().await.queue.len();
        BatcherStats { dropped_count: self.dropped_count.load(Ordering::SeqCst), queued }
    }

    pub fn reset_dropped_count(&self) {
        self.dropped_count.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test(start_paused = true)]
    async fn coalesces_same_key_within_debounce_window() {
        let received: Arc<StdMutex<Vec<Vec<(String, i32)>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let batcher = ThrottledBatcher::new(50, 50, 50, move |batch| {
            received_clone.lock().unwrap().push(batch);
        });

        batcher.enqueue("k1".to_string(), 1).await;
        batcher.enqueue("k1".to_string(), 2).await;
        batcher.enqueue("k1".to_string(), 3).await;
        batcher.enqueue("k2".to_string(), 4).await;

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        let batches = received.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![("k1".to_string(), 3), ("k2".to_string(), 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_shorter_than_batch_window_flushes_stale_value_separately() {
        let received: Arc<StdMutex<Vec<Vec<(String, i32)>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        // batch_window=200ms, debounce=50ms: a same-key update 60ms later
        // falls outside the debounce window, so it must not be silently
        // merged into whatever the batch-window timer eventually flushes.
        let batcher = ThrottledBatcher::new(200, 50, 50, move |batch| {
            received_clone.lock().unwrap().push(batch);
        });

        batcher.enqueue("k1".to_string(), 1).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        batcher.enqueue("k1".to_string(), 2).await;
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        let batches = received.lock().unwrap().clone();
        assert_eq!(batches.len(), 2, "expected the stale value to flush on its own, then the fresh one on the batch window");
        assert_eq!(batches[0], vec![("k1".to_string(), 1)]);
        assert_eq!(batches[1], vec![("k1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn drops_oldest_when_cap_exceeded_and_counts_each_drop() {
        let batcher = ThrottledBatcher::new(1000, 2, 0, |_| {});
        batcher.enqueue("a".to_string(), 1).await;
        batcher.enqueue("b".to_string(), 2).await;
        batcher.enqueue("c".to_string(), 3).await;
        let stats = batcher.get_stats().await;
        assert_eq!(stats.dropped_count, 1);
        assert_eq!(stats.queued, 2);
    }

    #[tokio::test]
    async fn stop_flushes_and_then_ignores_enqueues() {
        let received: Arc<StdMutex<usize>> = Arc::new(StdMutex::new(0));
        let received_clone = Arc::clone(&received);
        let batcher = ThrottledBatcher::new(1000, 50, 0, move |batch| {
            *received_clone.lock().unwrap() += batch.len();
        });
        batcher.enqueue("a".to_string(), 1).await;
        batcher.stop().await;
        assert_eq!(*received.lock().unwrap(), 1);

        batcher.enqueue("b".to_string(), 2).await;
        let stats = batcher.get_stats().await;
        assert_eq!(stats.queued, 0);
    }
}
