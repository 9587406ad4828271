//! Recurring background tasks contributed by modules.
//!
//! Tasks run independently of the request path, each on its own tokio task.
//! Nothing runs before the application reaches `Ready`: registrations made
//! from module hooks are queued and spawned together by
//! [`HostedTaskScheduler::start`]. A transient failure keeps the schedule; a
//! fatal one disables only the offending task. Shutdown cancels every task
//! cooperatively and aborts stragglers after a bounded grace period.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Failure raised by one run of a hosted task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Logged; the task keeps its schedule.
    #[error("transient task failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// The task is disabled and never rescheduled. Other tasks are unaffected.
    #[error("fatal task failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

/// Scheduling state of one registered task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum TaskStatus {
    /// Registered, waiting for the scheduler to start.
    Pending,
    Running,
    /// Disabled after a fatal failure; never rescheduled.
    Disabled,
    Cancelled,
}

/// A recurring unit of background work (e.g. polling a config source or
/// refreshing an error-code table).
#[async_trait]
pub trait HostedTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), TaskError>;
}

struct PendingTask {
    task: Arc<dyn HostedTask>,
    interval: Duration,
}

/// Runs module-contributed recurring tasks.
pub struct HostedTaskScheduler {
    pending: std::sync::Mutex<Vec<PendingTask>>,
    statuses: Arc<DashMap<String, TaskStatus>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl HostedTaskScheduler {
    pub fn new() -> Self {
        Self {
            pending: std::sync::Mutex::new(Vec::new()),
            statuses: Arc::new(DashMap::new()),
            handles: std::sync::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Register a recurring task.
    ///
    /// Before the scheduler starts the task is queued; afterwards it is
    /// spawned immediately. There is no ordering guarantee between tasks.
    pub fn schedule_recurring(&self, task: Arc<dyn HostedTask>, interval: Duration) {
        self.statuses
            .insert(task.name().to_string(), TaskStatus::Pending);
        if self.running.load(Ordering::Acquire) {
            self.spawn(task, interval);
        } else {
            lock(&self.pending).push(PendingTask { task, interval });
        }
    }

    /// Begin executing queued tasks. Invoked by the coordinator on `Ready`.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        let queued = std::mem::take(&mut *lock(&self.pending));
        let count = queued.len();
        for PendingTask { task, interval } in queued {
            self.spawn(task, interval);
        }
        tracing::info!("hosted task scheduler started ({count} tasks)");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.statuses.get(name).map(|s| *s)
    }

    /// Cancel all tasks, waiting up to `grace` for each before aborting it.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.running.store(false, Ordering::Release);
        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                abort.abort();
            }
        }
        tracing::info!("hosted task scheduler stopped");
    }

    fn spawn(&self, task: Arc<dyn HostedTask>, interval: Duration) {
        let name = task.name().to_string();
        self.statuses.insert(name.clone(), TaskStatus::Running);
        let statuses = Arc::clone(&self.statuses);
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of `interval` completes immediately; consume it
            // so the first run happens one interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        statuses.insert(name.clone(), TaskStatus::Cancelled);
                        break;
                    }
                    _ = ticker.tick() => {
                        match task.run().await {
                            Ok(()) => {}
                            Err(TaskError::Transient(cause)) => {
                                tracing::warn!(task = %name, "hosted task failed, keeping schedule: {cause:#}");
                            }
                            Err(TaskError::Fatal(cause)) => {
                                tracing::error!(task = %name, "hosted task failed fatally, disabling: {cause:#}");
                                statuses.insert(name.clone(), TaskStatus::Disabled);
                                break;
                            }
                        }
                    }
                }
            }
        });
        lock(&self.handles).push(handle);
    }
}

impl Default for HostedTaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        name: String,
        runs: Arc<AtomicUsize>,
        fail_fatally_after: Option<usize>,
    }

    #[async_trait]
    impl HostedTask for CountingTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self) -> Result<(), TaskError> {
            let count = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(limit) = self.fail_fatally_after {
                if count > limit {
                    return Err(TaskError::Fatal(anyhow!("budget exhausted")));
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tasks_do_not_run_before_start() {
        let scheduler = HostedTaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_recurring(
            Arc::new(CountingTask {
                name: "poller".into(),
                runs: Arc::clone(&runs),
                fail_fatally_after: None,
            }),
            Duration::from_millis(5),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.status("poller"), Some(TaskStatus::Pending));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runs.load(Ordering::SeqCst) > 0);
        assert_eq!(scheduler.status("poller"), Some(TaskStatus::Running));

        scheduler.shutdown(Duration::from_millis(100)).await;
        assert_eq!(scheduler.status("poller"), Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_fatal_failure_disables_only_offending_task() {
        let scheduler = HostedTaskScheduler::new();
        let doomed_runs = Arc::new(AtomicUsize::new(0));
        let healthy_runs = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_recurring(
            Arc::new(CountingTask {
                name: "doomed".into(),
                runs: Arc::clone(&doomed_runs),
                fail_fatally_after: Some(1),
            }),
            Duration::from_millis(5),
        );
        scheduler.schedule_recurring(
            Arc::new(CountingTask {
                name: "healthy".into(),
                runs: Arc::clone(&healthy_runs),
                fail_fatally_after: None,
            }),
            Duration::from_millis(5),
        );

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(scheduler.status("doomed"), Some(TaskStatus::Disabled));
        assert_eq!(doomed_runs.load(Ordering::SeqCst), 2);

        let healthy_before = healthy_runs.load(Ordering::SeqCst);
        assert!(healthy_before > 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(healthy_runs.load(Ordering::SeqCst) > healthy_before);

        scheduler.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_schedule_after_start_spawns_immediately() {
        let scheduler = HostedTaskScheduler::new();
        scheduler.start();

        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_recurring(
            Arc::new(CountingTask {
                name: "late".into(),
                runs: Arc::clone(&runs),
                fail_fatally_after: None,
            }),
            Duration::from_millis(5),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runs.load(Ordering::SeqCst) > 0);

        scheduler.shutdown(Duration::from_millis(100)).await;
    }
}
