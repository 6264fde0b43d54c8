//! Trailing-edge debouncer for async writes.
//!
//! [`Debouncer::schedule`] stores the latest value and (re)starts a timer.
//! When the timer runs out the stored value is handed to the sink. A value
//! scheduled while the timer is running replaces the stored one and restarts
//! the window, so a burst of calls produces a single write carrying the last
//! value.
//!
//! Writes never overlap: a write that starts while another is in flight waits
//! for it, keeping the channel's last write equal to the last value
//! scheduled.

use crate::lock;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Sink<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<T> {
    /// Bumped on every schedule; a timer only fires for its own generation.
    generation: u64,
    value: Option<T>,
}

pub struct Debouncer<T> {
    window: Duration,
    sink: Sink<T>,
    pending: Arc<Mutex<Pending<T>>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    timer: Option<oneshot::Sender<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(window: Duration, sink: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            window,
            sink: Arc::new(move |value| sink(value).boxed()),
            pending: Arc::new(Mutex::new(Pending {
                generation: 0,
                value: None,
            })),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            timer: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Store `value` and restart the window.
    ///
    /// Outside a Tokio runtime the value is kept until [`Debouncer::flush`].
    pub fn schedule(&mut self, value: T) {
        let generation = {
            let mut pending = lock(&self.pending);
            pending.generation = pending.generation.wrapping_add(1);
            pending.value = Some(value);
            pending.generation
        };
        let restarted = self.disarm();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; write deferred until flush");
            return;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let window = self.window;
        let pending = self.pending.clone();
        let sink = self.sink.clone();
        let write_lock = self.write_lock.clone();

        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = cancel_rx => return,
            }

            let _guard = write_lock.lock().await;
            let value = {
                let mut pending = lock(&pending);
                if pending.generation != generation {
                    return;
                }
                pending.value.take()
            };
            if let Some(value) = value {
                sink(value).await;
            }
        });

        self.timer = Some(cancel_tx);
        debug!(restarted, window_ms = window.as_millis() as u64, "Write scheduled");
    }

    /// Drop the pending value without writing it. Returns whether one was
    /// pending. A write already in flight is not interrupted.
    pub fn cancel(&mut self) -> bool {
        self.disarm();
        let mut pending = lock(&self.pending);
        pending.generation = pending.generation.wrapping_add(1);
        pending.value.take().is_some()
    }

    /// Write the pending value now, waiting for any in-flight write first.
    /// Returns whether a value was written.
    pub async fn flush(&mut self) -> bool {
        self.disarm();
        let _guard = self.write_lock.lock().await;
        let value = {
            let mut pending = lock(&self.pending);
            pending.generation = pending.generation.wrapping_add(1);
            pending.value.take()
        };
        match value {
            Some(value) => {
                (self.sink)(value).await;
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).value.is_some()
    }

    fn disarm(&mut self) -> bool {
        match self.timer.take() {
            Some(cancel) => cancel.send(()).is_ok(),
            None => false,
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.timer.take() {
            let _ = cancel.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Debouncer<u32>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink_writes = writes.clone();
        let debouncer = Debouncer::new(Duration::from_millis(1000), move |v| {
            let writes = sink_writes.clone();
            async move {
                writes.lock().unwrap().push(v);
            }
        });
        (writes, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_last_value() {
        let (writes, mut debouncer) = recorder();
        for i in 1..=5 {
            debouncer.schedule(i);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(writes.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(*writes.lock().unwrap(), vec![5]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_call_restarts_window() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(1);
        tokio::time::sleep(Duration::from_millis(900)).await;
        debouncer.schedule(2);
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(writes.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*writes.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_write_separately() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(1);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.schedule(2);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*writes.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_write() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(1);
        assert!(debouncer.is_pending());
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately_once() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(7);
        assert!(debouncer.flush().await);
        assert_eq!(*writes.lock().unwrap(), vec![7]);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(*writes.lock().unwrap(), vec![7]);
        assert!(!debouncer.flush().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(1);
        drop(debouncer);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_schedule_outside_runtime_defers_to_flush() {
        let (writes, mut debouncer) = recorder();
        debouncer.schedule(3);
        assert!(debouncer.is_pending());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        assert!(runtime.block_on(debouncer.flush()));
        assert_eq!(*writes.lock().unwrap(), vec![3]);
    }
}
