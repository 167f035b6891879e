// Debounce scheduler
//
// Coalesces bursts of updates per key into one settled value after a quiet
// period. Settled values are fanned out over a tokio broadcast channel, the
// same way the dashboard streams events to its clients.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// A value that survived its quiet period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled<K, V> {
    pub key: K,
    pub value: V,
}

struct Pending {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Pending {
    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Per-key last-write-wins debouncer.
///
/// Each `schedule` supersedes the pending timer for its key, so a burst of N
/// calls inside the delay yields exactly one emission carrying the last value.
/// Timers run on the ambient tokio runtime. Outside a runtime there is nothing
/// to drive a timer, so `schedule` degrades to `emit_now`. Dropping the
/// scheduler cancels everything still pending.
pub struct DebounceScheduler<K, V>
where
    K: Eq + Hash,
{
    pending: Arc<DashMap<K, Pending>>,
    sender: broadcast::Sender<Settled<K, V>>,
    next_generation: AtomicU64,
}

impl<K, V> DebounceScheduler<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Create a scheduler whose broadcast buffer holds `capacity` settled values
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            pending: Arc::new(DashMap::new()),
            sender,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm (or re-arm) the timer for `key`; `value` replaces any pending one
    pub fn schedule(&self, key: K, value: V, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(target: "debounce", key = ?key, "No runtime for timer; emitting now");
            self.emit_now(key, value);
            return;
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;

        // Register before spawning so an immediately-firing timer finds its entry.
        if let Some(previous) = self.pending.insert(
            key.clone(),
            Pending {
                generation,
                handle: None,
            },
        ) {
            previous.abort();
        }

        let pending = Arc::clone(&self.pending);
        let sender = self.sender.clone();
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if pending
                .remove_if(&task_key, |_, p| p.generation == generation)
                .is_some()
            {
                debug!(target: "debounce", key = ?task_key, "Debounced value settled");
                // No subscribers is fine
                let _ = sender.send(Settled {
                    key: task_key,
                    value,
                });
            }
        });

        match self.pending.get_mut(&key) {
            Some(mut entry) if entry.generation == generation => entry.handle = Some(handle),
            // Already fired or superseded; the task finishes on its own.
            _ => {}
        }

        debug!(target: "debounce", key = ?key, delay_ms = delay.as_millis() as u64, "Debounce armed");
    }

    /// Cancel any pending timer for `key` and emit `value` right away
    pub fn emit_now(&self, key: K, value: V) {
        self.cancel(&key);
        let _ = self.sender.send(Settled { key, value });
    }

    /// Drop the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some((_, p)) => {
                p.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending timer whose key matches; returns how many were dropped
    pub fn cancel_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut cancelled = 0;
        self.pending.retain(|k, p| {
            if predicate(k) {
                p.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Settled<K, V>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<K, V> Drop for DebounceScheduler<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            if let Some(handle) = &entry.value().handle {
                handle.abort();
            }
        }
        self.pending.clear();
    }
}
