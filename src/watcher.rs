/// The memory watcher: a background worker that samples memory on an
/// interval, applies the threshold policy and fires the trigger at most once.
///
/// `start`, `stop` and `shutdown` never touch watcher state directly; they
/// enqueue control messages for the worker task, which is the only writer of
/// the counter, the poll timer and the run state.
use crate::config::{WatchConfig, DEFAULT_WATCH_CONFIG};
use crate::policy::{ThresholdPolicy, TriggerReason, Verdict};
use crate::provider::{MemoryStatsProvider, ProcessMemory};
use crate::sink::{self, EventSink, EventSource, EventType};
use crate::termination::{ProcessExit, TerminationPolicy};
use crate::unit::MemoryUnit;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Roughly 30 years, as tokio uses for unbounded sleeps.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Lifecycle state of a watcher, as last recorded by its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Constructed, never started.
    Idle,
    /// Poll loop active.
    Running,
    /// Poll loop halted; `start` resumes it.
    Stopped,
    /// Trigger fired. Terminal.
    Triggered,
}

impl WatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WatchState::Running,
            2 => WatchState::Stopped,
            3 => WatchState::Triggered,
            _ => WatchState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WatchState::Idle => 0,
            WatchState::Running => 1,
            WatchState::Stopped => 2,
            WatchState::Triggered => 3,
        }
    }
}

/// Compare-and-set one-shot. Once set it is never cleared.
#[derive(Debug, Default)]
pub struct TriggerLatch(AtomicBool);

impl TriggerLatch {
    /// Returns `true` for exactly one caller over the latch's lifetime.
    pub fn try_fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Start,
    Stop,
    Tick,
    Shutdown,
}

/// State readable from outside the worker.
#[derive(Debug, Default)]
struct Shared {
    latch: TriggerLatch,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WatchState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Watches the memory consumption of the current process.
pub struct MemoryWatcher {
    cfg: WatchConfig,
    shared: Arc<Shared>,
    sink: EventSink,
    control: mpsc::UnboundedSender<Control>,
    // Taken and spawned by the first `start`.
    pending: Mutex<Option<(Worker, mpsc::UnboundedReceiver<Control>)>>,
}

impl std::fmt::Debug for MemoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWatcher")
            .field("cfg", &self.cfg)
            .field("state", &self.state())
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl MemoryWatcher {
    /// Create a watcher over this process's resident memory that exits the
    /// process when triggered. `None` or zero-valued fields take defaults.
    pub fn new(config: Option<WatchConfig>) -> Self {
        Self::with_collaborators(config, Arc::new(ProcessMemory), Arc::new(ProcessExit))
    }

    /// Create a watcher with an injected memory source and termination policy.
    pub fn with_collaborators(
        config: Option<WatchConfig>,
        provider: Arc<dyn MemoryStatsProvider>,
        termination: Arc<dyn TerminationPolicy>,
    ) -> Self {
        let cfg = config
            .unwrap_or_default()
            .merge_with_defaults(&DEFAULT_WATCH_CONFIG);
        let shared = Arc::new(Shared::default());
        let (events, sink) = sink::channel();
        let (control, control_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            cfg,
            policy: ThresholdPolicy::new(cfg),
            provider,
            termination,
            events,
            shared: Arc::clone(&shared),
            ticker: None,
        };

        Self {
            cfg,
            shared,
            sink,
            control,
            pending: Mutex::new(Some((worker, control_rx))),
        }
    }

    /// Effective configuration after merging with defaults.
    pub fn config(&self) -> WatchConfig {
        self.cfg
    }

    /// Start (or resume) polling and return the event sink.
    ///
    /// The same sink is returned on every call. After a trigger the sink is
    /// closed for good and further starts are ignored.
    ///
    /// # Panics
    ///
    /// The first call spawns the worker task and panics if not called from
    /// within a tokio runtime.
    pub fn start(&self) -> EventSink {
        self.spawn_worker();
        self.send(Control::Start);
        self.sink.clone()
    }

    /// Halt polling and reset the consecutive-tick counter. Does not close
    /// the sink or re-arm a fired trigger.
    pub fn stop(&self) {
        self.send(Control::Stop);
    }

    /// Ask the worker task to exit. Queued behind any pending termination
    /// wait; once processed the sink closes.
    pub fn shutdown(&self) {
        self.send(Control::Shutdown);
    }

    pub fn state(&self) -> WatchState {
        self.shared.state()
    }

    pub fn is_triggered(&self) -> bool {
        self.shared.latch.is_set()
    }

    pub fn reaches_critical(&self, total: MemoryUnit) -> bool {
        self.cfg.reaches_critical(total)
    }

    pub fn reaches_warning(&self, total: MemoryUnit) -> bool {
        self.cfg.reaches_warning(total)
    }

    fn spawn_worker(&self) {
        let pending = match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((worker, control_rx)) = pending {
            tokio::spawn(worker.run(control_rx));
        }
    }

    fn send(&self, msg: Control) {
        if self.control.send(msg).is_err() {
            debug!(?msg, "memory watcher worker has exited, control message dropped");
        }
    }
}

/// One `interval` from now, clamped to a far-future instant when the sum
/// would overflow.
fn first_tick_at(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or_else(|| {
        warn!(
            interval_secs = interval.as_secs(),
            "poll interval too large, first tick pushed to the far future"
        );
        now + FAR_FUTURE
    })
}

/// Owns everything the poll loop mutates.
struct Worker {
    cfg: WatchConfig,
    policy: ThresholdPolicy,
    provider: Arc<dyn MemoryStatsProvider>,
    termination: Arc<dyn TerminationPolicy>,
    events: EventSource,
    shared: Arc<Shared>,
    ticker: Option<Interval>,
}

impl Worker {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        loop {
            let msg = match self.ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    biased;
                    msg = control.recv() => msg,
                    _ = ticker.tick() => Some(Control::Tick),
                },
                None => control.recv().await,
            };

            match msg {
                Some(Control::Start) => self.start(),
                Some(Control::Stop) => self.stop(),
                Some(Control::Tick) => self.tick().await,
                Some(Control::Shutdown) | None => break,
            }
        }

        if self.shared.state() == WatchState::Running {
            self.shared.set_state(WatchState::Stopped);
        }
        debug!("memory watcher worker exited");
    }

    fn start(&mut self) {
        match self.shared.state() {
            WatchState::Running => {
                debug!("memory watcher already running, start ignored");
            }
            WatchState::Triggered => {
                debug!("memory watcher already triggered, start ignored");
            }
            WatchState::Idle | WatchState::Stopped => {
                let interval = self.cfg.interval;
                let mut ticker = tokio::time::interval_at(first_tick_at(interval), interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
                self.shared.set_state(WatchState::Running);
                info!(
                    interval_ms = interval.as_millis() as u64,
                    warning_limit = %self.cfg.warning_limit,
                    critical_limit = %self.cfg.critical_limit,
                    cycle = self.cfg.cycle,
                    "memory watcher started"
                );
            }
        }
    }

    fn stop(&mut self) {
        if self.shared.state() != WatchState::Running {
            debug!(state = ?self.shared.state(), "memory watcher not running, stop ignored");
            return;
        }
        self.ticker = None;
        self.policy.reset();
        self.shared.set_state(WatchState::Stopped);
        info!("memory watcher stopped");
    }

    async fn tick(&mut self) {
        if self.shared.state() != WatchState::Running {
            return;
        }

        let total = match self.provider.sample() {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "memory sample failed, skipping tick");
                return;
            }
        };

        if let Verdict::Trigger(reason) = self.policy.evaluate(total) {
            self.trigger(reason, total).await;
        }
    }

    /// Emit `Boom`, close the sink, stop polling, then terminate after the
    /// grace period. Runs at most once; the wait cannot be cancelled.
    async fn trigger(&mut self, reason: TriggerReason, total: MemoryUnit) {
        if !self.shared.latch.try_fire() {
            debug!(?reason, "memory watcher already triggered");
            return;
        }

        error!(
            ?reason,
            total = %total,
            critical_limit = %self.cfg.critical_limit,
            exit_time_ms = self.cfg.exit_time.as_millis() as u64,
            exit_code = self.cfg.exit_code,
            "memory limit reached, process will be terminated"
        );

        self.events.send_and_close(EventType::Boom);
        self.ticker = None;
        self.policy.reset();
        self.shared.set_state(WatchState::Triggered);

        tokio::time::sleep(self.cfg.exit_time).await;
        self.termination.terminate(self.cfg.exit_code);
    }
}
