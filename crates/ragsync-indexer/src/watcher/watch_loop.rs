//! Watch-mode driver.
//!
//! A single task consumes [`WatchEvent`]s and feeds them to the
//! [`WatchDebouncer`]. Timers and synchronization runs are spawned tasks that
//! report back through the same channel, so all state lives in one place.

use super::debounce::{DebounceAction, WatchDebouncer};
use crate::IndexerError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that can bring the index up to date.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run_sync(&self) -> Result<(), IndexerError>;
}

/// Input to the watch loop.
#[derive(Debug)]
pub enum WatchEvent {
    /// A watched path changed
    Changed(PathBuf),
    /// Debounce timer of the given generation elapsed
    TimerExpired(u64),
    /// The running synchronization completed
    SyncFinished(Result<(), String>),
    /// Stop after any running synchronization completes
    Shutdown,
}

/// Sends events into a [`WatchLoop`].
#[derive(Debug, Clone)]
pub struct WatchHandle {
    tx: mpsc::Sender<WatchEvent>,
}

impl WatchHandle {
    pub async fn notify(&self, path: PathBuf) -> Result<(), IndexerError> {
        self.send(WatchEvent::Changed(path)).await
    }

    /// For callers on non-async threads (e.g. watcher callbacks).
    pub fn blocking_notify(&self, path: PathBuf) -> Result<(), IndexerError> {
        self.tx
            .blocking_send(WatchEvent::Changed(path))
            .map_err(|_| IndexerError::Watcher("watch loop stopped".to_string()))
    }

    pub async fn shutdown(&self) -> Result<(), IndexerError> {
        self.send(WatchEvent::Shutdown).await
    }

    async fn send(&self, event: WatchEvent) -> Result<(), IndexerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| IndexerError::Watcher("watch loop stopped".to_string()))
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub notifications: u64,
    pub runs: u64,
    pub failed_runs: u64,
}

pub struct WatchLoop {
    runner: Arc<dyn SyncRunner>,
    debounce: Duration,
    debouncer: WatchDebouncer,
    tx: mpsc::Sender<WatchEvent>,
    rx: mpsc::Receiver<WatchEvent>,
}

impl WatchLoop {
    pub fn new(runner: Arc<dyn SyncRunner>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1000);
        Self {
            runner,
            debounce,
            debouncer: WatchDebouncer::new(),
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Process events until shutdown.
    ///
    /// A shutdown requested while a synchronization is running takes effect
    /// once that run has finished.
    pub async fn run(mut self) -> WatchStats {
        let mut stats = WatchStats::default();
        let mut stopping = false;

        info!(debounce_ms = self.debounce.as_millis() as u64, "Watch loop started");

        while let Some(event) = self.rx.recv().await {
            match event {
                WatchEvent::Changed(path) => {
                    stats.notifications += 1;
                    debug!(path = ?path, state = ?self.debouncer.state(), "Change notification");
                    if !stopping {
                        let action = self.debouncer.on_change();
                        self.perform(action);
                    }
                }
                WatchEvent::TimerExpired(generation) => {
                    if !stopping {
                        let action = self.debouncer.on_timer(generation);
                        self.perform(action);
                    }
                }
                WatchEvent::SyncFinished(result) => {
                    stats.runs += 1;
                    if let Err(e) = result {
                        stats.failed_runs += 1;
                        warn!(error = %e, "Synchronization failed");
                    }
                    let action = self.debouncer.on_sync_finished();
                    if stopping {
                        break;
                    }
                    self.perform(action);
                }
                WatchEvent::Shutdown => {
                    if self.debouncer.is_running() {
                        info!("Waiting for running synchronization");
                        stopping = true;
                    } else {
                        break;
                    }
                }
            }
        }

        info!(
            notifications = stats.notifications,
            runs = stats.runs,
            failed = stats.failed_runs,
            "Watch loop stopped"
        );

        stats
    }

    fn perform(&self, action: DebounceAction) {
        match action {
            DebounceAction::None => {}
            DebounceAction::StartTimer(generation) => {
                let tx = self.tx.clone();
                let debounce = self.debounce;
                tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    let _ = tx.send(WatchEvent::TimerExpired(generation)).await;
                });
            }
            DebounceAction::RunSync => {
                info!("Quiet period elapsed, synchronizing");
                let tx = self.tx.clone();
                let runner = self.runner.clone();
                tokio::spawn(async move {
                    // A panicking run still has to release the Running state.
                    let result = match tokio::spawn(async move { runner.run_sync().await }).await
                    {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(e) => Err(format!("synchronization task aborted: {}", e)),
                    };
                    let _ = tx.send(WatchEvent::SyncFinished(result)).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Instant};

    /// Records when each run started and finished.
    struct RecordingRunner {
        duration: Duration,
        runs: Mutex<Vec<(Instant, Instant)>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail: bool,
    }

    impl RecordingRunner {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                runs: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn runs(&self) -> Vec<(Instant, Instant)> {
            self.runs.lock().clone()
        }
    }

    #[async_trait]
    impl SyncRunner for RecordingRunner {
        async fn run_sync(&self) -> Result<(), IndexerError> {
            let start = Instant::now();
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            sleep(self.duration).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.lock().push((start, Instant::now()));
            if self.fail {
                return Err(IndexerError::Index("boom".to_string()));
            }
            Ok(())
        }
    }

    /// Panics partway through every run.
    struct PanickingRunner {
        started: AtomicUsize,
    }

    #[async_trait]
    impl SyncRunner for PanickingRunner {
        async fn run_sync(&self) -> Result<(), IndexerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(1)).await;
            panic!("splitter blew up");
        }
    }

    fn spawn_loop(
        runner: Arc<dyn SyncRunner>,
    ) -> (WatchHandle, tokio::task::JoinHandle<WatchStats>) {
        let watch = WatchLoop::new(runner, Duration::from_secs(2));
        let handle = watch.handle();
        (handle, tokio::spawn(watch.run()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_run() {
        let runner = RecordingRunner::new(Duration::from_millis(500));
        let (handle, task) = spawn_loop(runner.clone());

        let mut last = Instant::now();
        for i in 0..5 {
            if i > 0 {
                sleep(Duration::from_millis(100)).await;
            }
            handle.notify(PathBuf::from("a.py")).await.unwrap();
            last = Instant::now();
        }

        sleep(Duration::from_secs(10)).await;
        handle.shutdown().await.unwrap();
        let stats = task.await.unwrap();

        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].0 >= last + Duration::from_secs(2));
        assert_eq!(stats.notifications, 5);
        assert_eq!(stats.runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_run_triggers_rerun() {
        let runner = RecordingRunner::new(Duration::from_secs(3));
        let (handle, task) = spawn_loop(runner.clone());

        handle.notify(PathBuf::from("a.py")).await.unwrap();
        // Run starts at +2s and lasts until +5s.
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(runner.active.load(Ordering::SeqCst), 1);
        handle.notify(PathBuf::from("b.py")).await.unwrap();

        sleep(Duration::from_secs(20)).await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let runs = runner.runs();
        assert_eq!(runs.len(), 2);
        assert!(runs[1].0 >= runs[0].1 + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_never_overlap() {
        let runner = RecordingRunner::new(Duration::from_secs(3));
        let (handle, task) = spawn_loop(runner.clone());

        // Each run is still in progress when the next change arrives.
        for _ in 0..12 {
            handle.notify(PathBuf::from("a.py")).await.unwrap();
            sleep(Duration::from_millis(2500)).await;
        }

        sleep(Duration::from_secs(30)).await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        let runs = runner.runs();
        assert!(runs.len() >= 2);
        for pair in runs.windows(2) {
            assert!(pair[1].0 >= pair[0].1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_sync() {
        let runner = RecordingRunner::new(Duration::from_secs(5));
        let (handle, task) = spawn_loop(runner.clone());

        handle.notify(PathBuf::from("a.py")).await.unwrap();
        sleep(Duration::from_secs(3)).await;
        handle.shutdown().await.unwrap();

        let stats = task.await.unwrap();
        assert_eq!(stats.runs, 1);
        assert_eq!(runner.runs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_keeps_watching() {
        let runner = Arc::new(RecordingRunner {
            duration: Duration::from_millis(10),
            runs: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail: true,
        });
        let (handle, task) = spawn_loop(runner.clone());

        handle.notify(PathBuf::from("a.py")).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        handle.notify(PathBuf::from("a.py")).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        handle.shutdown().await.unwrap();

        let stats = task.await.unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failed_runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_shutdown_never_syncs() {
        let runner = RecordingRunner::new(Duration::from_secs(1));
        let (handle, task) = spawn_loop(runner.clone());

        handle.shutdown().await.unwrap();
        let stats = task.await.unwrap();

        assert_eq!(stats, WatchStats::default());
        assert!(runner.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_sync_counts_as_failure() {
        let runner = Arc::new(PanickingRunner {
            started: AtomicUsize::new(0),
        });
        let (handle, task) = spawn_loop(runner.clone());

        handle.notify(PathBuf::from("a.py")).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        handle.notify(PathBuf::from("a.py")).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        handle.shutdown().await.unwrap();

        let stats = task.await.unwrap();
        assert_eq!(runner.started.load(Ordering::SeqCst), 2);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failed_runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_panicking_sync_completes() {
        let runner = Arc::new(PanickingRunner {
            started: AtomicUsize::new(0),
        });
        let (handle, task) = spawn_loop(runner.clone());

        handle.notify(PathBuf::from("a.py")).await.unwrap();
        // Run starts at +2s and panics at +3s.
        sleep(Duration::from_millis(2500)).await;
        handle.shutdown().await.unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("watch loop hung after a panicking run")
            .unwrap();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.failed_runs, 1);
    }
}
