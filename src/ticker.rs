//! Drives the layout engine on a fixed interval and publishes snapshots.
//!
//! The engine sits behind a plain `std::sync::Mutex`: every tick is a short
//! synchronous step and the lock is never held across an `.await`.

use crate::layout::{LayoutEngine, LayoutSnapshot};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub type SharedLayout = Arc<Mutex<LayoutEngine>>;

/// Lock the engine, recovering the state if a previous holder panicked.
pub fn lock_layout(layout: &Mutex<LayoutEngine>) -> MutexGuard<'_, LayoutEngine> {
    layout.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LayoutDriver {
    engine: SharedLayout,
    period: Duration,
    snapshots: Arc<watch::Sender<LayoutSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LayoutDriver {
    pub fn new(engine: SharedLayout, period: Duration) -> Self {
        let initial = lock_layout(&engine).snapshot();
        let (tx, _) = watch::channel(initial);
        Self {
            engine,
            period: period.max(Duration::from_millis(1)),
            snapshots: Arc::new(tx),
            task: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &SharedLayout {
        &self.engine
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutSnapshot> {
        self.snapshots.subscribe()
    }

    /// Open snapshot streams.
    pub fn subscriber_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Push the engine's current state to subscribers without ticking.
    pub fn publish(&self) {
        let snapshot = lock_layout(&self.engine).snapshot();
        self.snapshots.send_replace(snapshot);
    }

    pub fn is_running(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the tick loop unless it is already running. Resumes a stopped
    /// engine. Must be called from inside a tokio runtime.
    pub fn ensure_running(&self) {
        let mut slot = self.task_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        {
            let mut engine = lock_layout(&self.engine);
            if engine.is_empty() {
                return;
            }
            engine.resume();
        }
        tracing::debug!(period_ms = self.period.as_millis() as u64, "layout ticker started");
        *slot = Some(tokio::spawn(run(
            self.engine.clone(),
            self.period,
            self.snapshots.clone(),
        )));
    }

    /// Halt ticking, e.g. when the graph view unmounts. Positions are kept.
    pub fn stop(&self) {
        if let Some(handle) = self.task_slot().take() {
            handle.abort();
        }
        lock_layout(&self.engine).stop();
        self.publish();
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LayoutDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.task_slot().take() {
            handle.abort();
        }
    }
}

async fn run(engine: SharedLayout, period: Duration, snapshots: Arc<watch::Sender<LayoutSnapshot>>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let (snapshot, done) = {
            let mut engine = lock_layout(&engine);
            if engine.is_stopped() {
                (engine.snapshot(), true)
            } else {
                engine.tick();
                (engine.snapshot(), engine.is_empty())
            }
        };
        snapshots.send_replace(snapshot);
        if done {
            tracing::debug!("layout ticker finished");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_knowledge_graph;
    use crate::layout::SimulationState;
    use crate::models::{KnowledgeGraph, Note};

    fn driver_with(notes: &[Note]) -> LayoutDriver {
        let mut engine = LayoutEngine::default();
        engine.sync(&build_knowledge_graph(notes));
        LayoutDriver::new(Arc::new(Mutex::new(engine)), Duration::from_millis(16))
    }

    fn pair() -> Vec<Note> {
        vec![Note::new("A", "[[B]]"), Note::new("B", "")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_publish_snapshots() {
        let driver = driver_with(&pair());
        let mut rx = driver.subscribe();
        let alpha_before = rx.borrow().alpha;

        driver.ensure_running();
        assert!(driver.is_running());
        rx.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.nodes.len(), 2);
        assert!(snap.alpha < alpha_before);
        assert_ne!(snap.state, SimulationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_and_keeps_positions() {
        let driver = driver_with(&pair());
        driver.ensure_running();
        tokio::time::sleep(Duration::from_millis(100)).await;
        driver.stop();
        assert!(!driver.is_running());

        let frozen = lock_layout(driver.engine()).positions();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(lock_layout(driver.engine()).positions(), frozen);
        assert_eq!(driver.subscribe().borrow().state, SimulationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finishes_when_node_set_empties() {
        let driver = driver_with(&pair());
        driver.ensure_running();
        tokio::time::sleep(Duration::from_millis(50)).await;

        lock_layout(driver.engine()).sync(&KnowledgeGraph::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!driver.is_running());
        assert!(driver.subscribe().borrow().nodes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_engine_does_not_start() {
        let driver = driver_with(&[]);
        driver.ensure_running();
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let driver = driver_with(&pair());
        driver.ensure_running();
        driver.stop();
        driver.ensure_running();
        assert!(driver.is_running());
        assert!(!lock_layout(driver.engine()).is_stopped());
    }

    #[test]
    fn test_subscriber_count_tracks_open_streams() {
        let driver = driver_with(&pair());
        assert_eq!(driver.subscriber_count(), 0);
        let a = driver.subscribe();
        let b = driver.subscribe();
        assert_eq!(driver.subscriber_count(), 2);
        drop(a);
        assert_eq!(driver.subscriber_count(), 1);
        drop(b);
        assert_eq!(driver.subscriber_count(), 0);
    }
}
