//! Periodic background maintenance.
//!
//! Each registered [`BackgroundTask`] gets its own tokio task driven by an
//! interval timer. Runs of one task never overlap: a run that takes longer
//! than the interval delays the next tick instead of queueing extra runs.
//! [`Scheduler::shutdown`] signals every loop and waits for it to exit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

/// Context provided to background tasks during execution
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

/// Trait for background tasks that run periodically
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: Context) -> Result<()>;
}

pub struct Scheduler {
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a periodic background task. Must be called inside a tokio
    /// runtime.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let name = task.name();
        let handle = self.spawn_timer_loop(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tracing::debug!(task = task.name(), ?interval, "Registered background task");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };

                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                run_id,
                                error = %e,
                                "Task execution failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), runs = run_id, "Task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Graceful shutdown - signal every task and wait for it to finish its
    /// current run
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (name, handle) in tasks {
            handle
                .await
                .map_err(|e| Error::InvalidState(format!("Task {} join error: {}", name, e)))?;
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        interval: Duration,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackgroundTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn execute(&self, _ctx: Context) -> Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTask;

    #[async_trait::async_trait]
    impl BackgroundTask for FailingTask {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn execute(&self, _ctx: Context) -> Result<()> {
            Err(Error::InvalidOperation("always fails".to_string()))
        }
    }

    #[tokio::test]
    async fn test_scheduler_runs_tasks() -> Result<()> {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        }));
        assert_eq!(scheduler.task_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_task_keeps_running() -> Result<()> {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .register(Arc::new(FailingTask))
            .register(Arc::new(CountingTask {
                interval: Duration::from_millis(5),
                counter: counter.clone(),
            }));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(counter.load(Ordering::SeqCst) > 1);
        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_graceful_shutdown() -> Result<()> {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(25)).await;

        let start = std::time::Instant::now();
        scheduler.shutdown().await?;
        assert!(start.elapsed() < Duration::from_millis(100));

        let count_after_shutdown = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), count_after_shutdown);

        Ok(())
    }
}
