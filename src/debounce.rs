//! Coalescing of rapid writes.
//!
//! Only the most recent value survives; it is handed to the sink once the
//! delay passes without a newer one, or right away on [`Debouncer::flush`].

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct Debouncer<T> {
    delay: Duration,
    pending: Arc<Mutex<Option<T>>>,
    timer: Option<JoinHandle<()>>,
    sink: Sink<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(None)),
            timer: None,
            sink: Arc::new(sink),
        }
    }

    /// Replace the pending value and restart the delay. Must be called from
    /// inside a tokio runtime.
    pub fn schedule(&mut self, value: T) {
        *lock(&self.pending) = Some(value);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let pending = self.pending.clone();
        let sink = self.sink.clone();
        let delay = self.delay;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let value = lock(&pending).take();
            if let Some(value) = value {
                sink(value);
            }
        }));
    }

    /// Deliver the pending value now. Returns whether there was one.
    pub fn flush(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let value = lock(&self.pending).take();
        match value {
            Some(value) => {
                (self.sink)(value);
                true
            }
            None => false,
        }
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&mut self) -> Option<T> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        lock(&self.pending).take()
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
