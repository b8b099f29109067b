use crate::error::{GuardianError, Result, SchedulerError};
use crate::lifecycle::{LifecycleState, StateCell};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SCHEDULER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The closed set of scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerName {
    DailySummary,
    Cleanup,
}

impl TriggerName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerName::DailySummary => "daily_summary",
            TriggerName::Cleanup => "cleanup",
        }
    }
}

/// Parse a wall-clock `HH:MM` string.
pub fn parse_time_of_day(value: &str) -> std::result::Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| SchedulerError::InvalidTimeOfDay {
        value: value.to_string(),
    })
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Box<dyn Fn() -> TaskFuture + Send + Sync>;

struct ScheduledTask {
    name: TriggerName,
    at: NaiveTime,
    callback: TaskFn,
    last_fired: Mutex<Option<NaiveDate>>,
}

/// Once-per-day task runner.
///
/// Polls wall-clock time in the configured timezone and fires each task the
/// first time the local time passes its target on a given day. The fired day
/// is recorded before the callback runs, so a slow or failing callback can
/// never double-fire. A daemon started after a task's target time fires that
/// task immediately.
pub struct TaskScheduler {
    tz: Tz,
    poll_interval: Duration,
    tasks: Mutex<Vec<Arc<ScheduledTask>>>,
    state: StateCell,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(timezone: &str, poll_interval: Duration) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone {
                value: timezone.to_string(),
            })?;
        Ok(Self {
            tz,
            poll_interval,
            tasks: Mutex::new(Vec::new()),
            state: StateCell::new(),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Register a job at a wall-clock `HH:MM` time. Registration replaces any
    /// earlier registration under the same name.
    pub fn register<F, Fut>(&self, name: TriggerName, time_of_day: &str, callback: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let at = parse_time_of_day(time_of_day)?;
        let task = Arc::new(ScheduledTask {
            name,
            at,
            callback: Box::new(move || Box::pin(callback())),
            last_fired: Mutex::new(None),
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| t.name != name);
        tasks.push(task);
        info!(trigger = name.as_str(), at = %at, "Scheduled daily task");
        Ok(())
    }

    /// Run a task immediately, outside its schedule. Marks the task as fired
    /// for the current day.
    pub async fn run_now(&self, name: TriggerName) -> Result<()> {
        let task = {
            let tasks = self.tasks.lock();
            tasks.iter().find(|t| t.name == name).cloned()
        }
        .ok_or(GuardianError::Scheduler(
            SchedulerError::UnregisteredTrigger {
                name: name.as_str(),
            },
        ))?;

        let today = Utc::now().with_timezone(&self.tz).date_naive();
        *task.last_fired.lock() = Some(today);
        info!(trigger = name.as_str(), "Running task on demand");
        (task.callback)().await;
        Ok(())
    }

    /// Collect the tasks due at `now`, marking each as fired for that day.
    fn take_due(&self, now: DateTime<Tz>) -> Vec<Arc<ScheduledTask>> {
        let today = now.date_naive();
        let time = now.time();
        let tasks = self.tasks.lock();
        tasks
            .iter()
            .filter(|t| {
                if time < t.at {
                    return false;
                }
                let mut last = t.last_fired.lock();
                if *last == Some(today) {
                    return false;
                }
                *last = Some(today);
                true
            })
            .cloned()
            .collect()
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        if matches!(
            self.state.get(),
            LifecycleState::Starting | LifecycleState::Running
        ) {
            info!("Scheduler already running, start is a no-op");
            return Ok(());
        }
        self.state.transition(LifecycleState::Starting)?;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now().with_timezone(&this.tz);
                        for due in this.take_due(now) {
                            info!(trigger = due.name.as_str(), "Firing scheduled task");
                            (due.callback)().await;
                        }
                    }
                }
            }
            debug!("Scheduler loop exited");
        });
        *self.task.lock() = Some(task);

        self.state.transition(LifecycleState::Running)?;
        info!(timezone = %self.tz, "Scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let current = self.state.get();
        if matches!(current, LifecycleState::Stopped | LifecycleState::Stopping) {
            return Ok(());
        }
        self.state.transition(LifecycleState::Stopping)?;
        self.cancel.lock().cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(SCHEDULER_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Scheduler task panicked: {}", e),
                Err(_) => {
                    warn!("Scheduler did not stop in time, abandoning");
                    self.state.force(LifecycleState::Stopped);
                    return Err(GuardianError::LifecycleTimeout {
                        component: "scheduler",
                        timeout_secs: SCHEDULER_STOP_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        self.state.transition(LifecycleState::Stopped)?;
        info!("Scheduler stopped");
        Ok(())
    }

    #[cfg(test)]
    fn due_names(&self, now: DateTime<Tz>) -> Vec<TriggerName> {
        self.take_due(now).iter().map(|t| t.name).collect()
    }
}

/// Fire-and-log wrapper used by scheduled jobs whose errors must not take
/// down the scheduler loop.
pub async fn run_logged<F, Fut>(name: &'static str, job: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if let Err(e) = job().await {
        error!(trigger = name, "Scheduled task failed: {}", e);
    }
}
