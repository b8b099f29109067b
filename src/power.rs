use crate::error::{GuardianError, PowerMonitorError, Result};
use crate::lifecycle::{LifecycleState, StateCell};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Power and session transitions the platform can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerEvent {
    Sleep,
    Wake,
    Lock,
    Unlock,
}

impl PowerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerEvent::Sleep => "sleep",
            PowerEvent::Wake => "wake",
            PowerEvent::Lock => "lock",
            PowerEvent::Unlock => "unlock",
        }
    }
}

impl fmt::Display for PowerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform binding that feeds [`PowerEvent`]s into the monitor.
pub trait PowerSignalSource: Send + Sync {
    /// Start delivering events into `tx` until `cancel` fires.
    fn subscribe(
        &self,
        tx: mpsc::UnboundedSender<PowerEvent>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), PowerMonitorError>;
}

/// Unix signal binding: SIGUSR1 maps to Lock, SIGUSR2 to Unlock. This is the
/// hook for desktop lockers and suspend scripts to drive pause-resume.
pub struct UnixSignalSource;

impl PowerSignalSource for UnixSignalSource {
    fn subscribe(
        &self,
        tx: mpsc::UnboundedSender<PowerEvent>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), PowerMonitorError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = signal(SignalKind::user_defined1()).map_err(|e| PowerMonitorError::Bind {
            message: format!("SIGUSR1: {e}"),
        })?;
        let mut usr2 = signal(SignalKind::user_defined2()).map_err(|e| PowerMonitorError::Bind {
            message: format!("SIGUSR2: {e}"),
        })?;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = usr1.recv() => {
                        if tx.send(PowerEvent::Lock).is_err() {
                            break;
                        }
                    }
                    _ = usr2.recv() => {
                        if tx.send(PowerEvent::Unlock).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

type Listener = Box<dyn Fn() + Send + Sync>;

/// Dispatches power and session events to registered listeners.
///
/// Listeners are registered per event before start. A source that fails to
/// bind leaves the monitor running but inert; capture simply never pauses on
/// that platform.
pub struct PowerMonitor {
    source: Arc<dyn PowerSignalSource>,
    listeners: Arc<Mutex<HashMap<PowerEvent, Vec<Listener>>>>,
    state: StateCell,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PowerMonitor {
    pub fn new(source: Arc<dyn PowerSignalSource>) -> Self {
        Self {
            source,
            listeners: Arc::new(Mutex::new(HashMap::new())),
            state: StateCell::new(),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn register<F>(&self, event: PowerEvent, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .entry(event)
            .or_default()
            .push(Box::new(listener));
    }

    pub fn start(&self) -> Result<()> {
        if matches!(
            self.state.get(),
            LifecycleState::Starting | LifecycleState::Running
        ) {
            info!("Power monitor already running, start is a no-op");
            return Ok(());
        }
        self.state.transition(LifecycleState::Starting)?;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        match self.source.subscribe(tx, cancel.clone()) {
            Ok(()) => {
                let listeners = Arc::clone(&self.listeners);
                let task = tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            event = rx.recv() => {
                                let Some(event) = event else { break };
                                Self::dispatch(&listeners, event);
                            }
                        }
                    }
                    debug!("Power monitor loop exited");
                });
                *self.task.lock() = Some(task);
            }
            Err(e) => {
                // No platform events available; run inert rather than fail
                // the whole daemon.
                warn!("Power event source unavailable, monitor is inert: {}", e);
            }
        }

        self.state.transition(LifecycleState::Running)?;
        info!("Power monitor started");
        Ok(())
    }

    fn dispatch(listeners: &Mutex<HashMap<PowerEvent, Vec<Listener>>>, event: PowerEvent) {
        info!(event = %event, "Power event received");
        let listeners = listeners.lock();
        if let Some(callbacks) = listeners.get(&event) {
            for callback in callbacks {
                // One misbehaving listener must not take down the dispatch
                // loop or suppress the listeners after it.
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback();
                }));
                if outcome.is_err() {
                    error!(event = %event, "Power event listener panicked");
                }
            }
        }
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
            match tokio::time::timeout(MONITOR_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Power monitor task panicked: {}", e),
                Err(_) => {
                    warn!("Power monitor did not stop in time, abandoning");
                    self.state.force(LifecycleState::Stopped);
                    return Err(GuardianError::LifecycleTimeout {
                        component: "power_monitor",
                        timeout_secs: MONITOR_STOP_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        self.state.transition(LifecycleState::Stopped)?;
        info!("Power monitor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test source exposing the sender so tests can inject events.
    struct ManualSource {
        tx_slot: Mutex<Option<mpsc::UnboundedSender<PowerEvent>>>,
        fail_bind: bool,
    }

    impl ManualSource {
        fn new(fail_bind: bool) -> Self {
            Self {
                tx_slot: Mutex::new(None),
                fail_bind,
            }
        }

        fn emit(&self, event: PowerEvent) {
            self.tx_slot.lock().as_ref().unwrap().send(event).unwrap();
        }
    }

    impl PowerSignalSource for ManualSource {
        fn subscribe(
            &self,
            tx: mpsc::UnboundedSender<PowerEvent>,
            _cancel: CancellationToken,
        ) -> std::result::Result<(), PowerMonitorError> {
            if self.fail_bind {
                return Err(PowerMonitorError::Bind {
                    message: "no session bus".to_string(),
                });
            }
            *self.tx_slot.lock() = Some(tx);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_reach_registered_listeners_only() {
        let source = Arc::new(ManualSource::new(false));
        let monitor = PowerMonitor::new(source.clone());

        let sleeps = Arc::new(AtomicUsize::new(0));
        let locks = Arc::new(AtomicUsize::new(0));
        {
            let sleeps = sleeps.clone();
            monitor.register(PowerEvent::Sleep, move || {
                sleeps.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let locks = locks.clone();
            monitor.register(PowerEvent::Lock, move || {
                locks.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.start().unwrap();
        source.emit(PowerEvent::Sleep);
        source.emit(PowerEvent::Sleep);
        source.emit(PowerEvent::Unlock); // nobody registered
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sleeps.load(Ordering::SeqCst), 2);
        assert_eq!(locks.load(Ordering::SeqCst), 0);
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_monitor_inert_but_running() {
        let monitor = PowerMonitor::new(Arc::new(ManualSource::new(true)));
        monitor.register(PowerEvent::Sleep, || {});

        monitor.start().unwrap();
        assert_eq!(monitor.state(), LifecycleState::Running);
        monitor.stop().await.unwrap();
        assert_eq!(monitor.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_the_rest() {
        let source = Arc::new(ManualSource::new(false));
        let monitor = PowerMonitor::new(source.clone());
        let count = Arc::new(AtomicUsize::new(0));

        monitor.register(PowerEvent::Sleep, || panic!("bad listener"));
        {
            let count = count.clone();
            monitor.register(PowerEvent::Sleep, move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.start().unwrap();
        source.emit(PowerEvent::Sleep);
        source.emit(PowerEvent::Sleep);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The second listener keeps firing, and the dispatch loop survives.
        assert_eq!(count.load(Ordering::SeqCst), 2);
        monitor.stop().await.unwrap();
        assert_eq!(monitor.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_multiple_listeners_per_event() {
        let source = Arc::new(ManualSource::new(false));
        let monitor = PowerMonitor::new(source.clone());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            monitor.register(PowerEvent::Wake, move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.start().unwrap();
        source.emit(PowerEvent::Wake);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        monitor.stop().await.unwrap();
    }
}
