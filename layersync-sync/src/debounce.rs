//! Per-stream debounce timers.
//!
//! The first dirty signal for a stream arms a one-shot timer; signals that
//! arrive while it is armed are absorbed. When the timer expires the stream
//! id is sent once on the fire channel and the timer disarms. The delay runs
//! from the first signal and is not extended by later ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use layersync_core::types::StreamId;

use crate::context::lock;

/// A timer task and the generation it was armed with.
#[derive(Debug)]
struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<StreamId, Timer>>>;

#[derive(Debug, Clone)]
pub struct DebounceScheduler {
    delay: Duration,
    armed: Timers,
    generation: Arc<AtomicU64>,
    fire_tx: mpsc::UnboundedSender<StreamId>,
    runtime: Handle,
}

impl DebounceScheduler {
    /// Create a scheduler and the channel its expirations arrive on.
    ///
    /// Must be called from within a Tokio runtime; timers are spawned onto
    /// that runtime even when signals come from a foreign thread.
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<StreamId>) {
        Self::with_handle(delay, Handle::current())
    }

    pub fn with_handle(delay: Duration, runtime: Handle) -> (Self, mpsc::UnboundedReceiver<StreamId>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            delay,
            armed: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            fire_tx,
            runtime,
        };
        (scheduler, fire_rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Raise a dirty signal. Returns `true` when this call armed the timer.
    pub fn signal(&self, stream_id: &StreamId) -> bool {
        let mut armed = lock(&self.armed);
        if armed.contains_key(stream_id) {
            return false;
        }

        let delay = self.delay;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let stream = stream_id.clone();
        let timers = Arc::clone(&self.armed);
        let fire_tx = self.fire_tx.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !expire(&timers, &stream, generation) {
                tracing::debug!("debounce for {stream} was disarmed before it fired");
                return;
            }
            if fire_tx.send(stream).is_err() {
                tracing::debug!("debounce fired after the scheduler was dropped");
            }
        });
        armed.insert(stream_id.clone(), Timer { generation, task });
        true
    }

    /// Cancel a pending timer. Returns `true` when one was armed.
    pub fn disarm(&self, stream_id: &StreamId) -> bool {
        match lock(&self.armed).remove(stream_id) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, stream_id: &StreamId) -> bool {
        lock(&self.armed).contains_key(stream_id)
    }
}

/// Drop the stream's timer entry if it still belongs to `generation`.
/// Returns `false` when the entry was disarmed or replaced meanwhile.
fn expire(timers: &Timers, stream: &StreamId, generation: u64) -> bool {
    let mut armed = lock(timers);
    match armed.get(stream) {
        Some(timer) if timer.generation == generation => {
            armed.remove(stream);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(2000);

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_within_window_fires_once() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        let stream = StreamId::from("s1");

        assert!(scheduler.signal(&stream));
        settle().await;
        for _ in 0..9 {
            tokio::time::advance(Duration::from_millis(100)).await;
            assert!(!scheduler.signal(&stream));
        }
        tokio::time::advance(DELAY).await;
        settle().await;

        assert_eq!(fired.try_recv().unwrap(), stream);
        assert!(fired.try_recv().is_err());
        assert!(!scheduler.is_armed(&stream));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn signals_spaced_beyond_window_fire_each_time() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        let stream = StreamId::from("s1");

        for _ in 0..3 {
            scheduler.signal(&stream);
            settle().await;
            tokio::time::advance(DELAY + Duration::from_millis(10)).await;
            settle().await;
        }
        let mut count = 0;
        while fired.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn deadline_is_not_pushed_out_by_later_signals() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        let stream = StreamId::from("s1");

        scheduler.signal(&stream);
        settle().await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        scheduler.signal(&stream);
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(fired.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn streams_have_independent_timers() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        assert!(scheduler.signal(&StreamId::from("a")));
        assert!(scheduler.signal(&StreamId::from("b")));
        settle().await;
        tokio::time::advance(DELAY).await;
        settle().await;

        let mut streams = vec![fired.try_recv().unwrap(), fired.try_recv().unwrap()];
        streams.sort();
        assert_eq!(streams, [StreamId::from("a"), StreamId::from("b")]);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn disarm_cancels_pending_timer() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        let stream = StreamId::from("s1");
        scheduler.signal(&stream);
        assert!(scheduler.disarm(&stream));
        tokio::time::advance(DELAY * 2).await;
        settle().await;
        assert!(fired.try_recv().is_err());
        assert!(!scheduler.disarm(&stream));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn stale_timer_leaves_the_rearmed_entry_alone() {
        let (scheduler, mut fired) = DebounceScheduler::new(DELAY);
        let stream = StreamId::from("s1");

        scheduler.signal(&stream);
        let stale = lock(&scheduler.armed)[&stream].generation;
        scheduler.disarm(&stream);
        assert!(scheduler.signal(&stream));

        // the disarmed task reaching its expiry must not evict the new timer
        assert!(!expire(&scheduler.armed, &stream, stale));
        assert!(scheduler.is_armed(&stream));
        assert!(!scheduler.signal(&stream));

        settle().await;
        tokio::time::advance(DELAY).await;
        settle().await;
        assert_eq!(fired.try_recv().unwrap(), stream);
        assert!(fired.try_recv().is_err());
        assert!(!scheduler.is_armed(&stream));
    }
}
