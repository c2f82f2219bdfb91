//! Session controller.
//!
//! Owns the run/stop lifecycle and exposes start/stop/reset to the
//! presentation layer. Rounds run strictly one after another on a single
//! worker task that owns the `Session` while it runs and hands it back
//! through its `JoinHandle` when it exits. A new worker is spawned only
//! after the previous one returned, so wagers never overlap.
//!
//! Stop is cooperative: `stop()` bumps an epoch on a watch channel. The
//! worker compares its own epoch before every round and wakes from the
//! inter-round sleep when it changes; a round already in flight completes
//! and is recorded. A stop that arrives while `start()` is still waiting
//! for the previous worker is remembered and applied to the new run.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::balance::{BalanceMonitor, Refresh, DEFAULT_REFRESH_EVERY};
use super::executor::RoundExecutor;
use crate::platforms::WagerService;
use crate::strategy::{Decision, StakingConfig, StakingStrategy};
use crate::types::{
    EventKind, RoundError, RunState, SessionConfig, SessionError, SessionEvent, SessionStats,
    SessionView, StopReason, StrategyState,
};

/// Pause between rounds, respecting the service's rate limits.
pub const DEFAULT_INTER_ROUND_DELAY: Duration = Duration::from_millis(3000);

const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub inter_round_delay: Duration,
    /// Safety-net balance refresh cadence, in round attempts.
    pub balance_refresh_every: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            inter_round_delay: DEFAULT_INTER_ROUND_DELAY,
            balance_refresh_every: DEFAULT_REFRESH_EVERY,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Mutable state of one betting session.
pub struct Session {
    config: SessionConfig,
    strategy: StrategyState,
    stats: SessionStats,
    monitor: BalanceMonitor,
}

impl Session {
    fn new(config: SessionConfig, service: Arc<dyn WagerService>, refresh_every: u64) -> Self {
        let strategy = StakingStrategy::new(StakingConfig::from(&config)).initial_state();
        Self {
            monitor: BalanceMonitor::new(service, &config.currency, refresh_every),
            strategy,
            stats: SessionStats::default(),
            config,
        }
    }

    /// Continue after a stop. Statistics carry over; staking progress
    /// survives only when the configuration is unchanged.
    fn resume(mut self, config: SessionConfig, service: Arc<dyn WagerService>, refresh_every: u64) -> Self {
        if self.config != config {
            if !self.config.currency.eq_ignore_ascii_case(&config.currency) {
                self.monitor = BalanceMonitor::new(service, &config.currency, refresh_every);
            }
            self.strategy = StakingStrategy::new(StakingConfig::from(&config)).initial_state();
            self.config = config;
        }
        self.monitor.restart();
        self
    }

    fn view(&self, run_state: RunState) -> SessionView {
        SessionView {
            run_state,
            current_bet: self.strategy.next_stake,
            consecutive_losses: self.strategy.consecutive_losses,
            balance: self.monitor.current(),
            config: Some(self.config.clone()),
            stats: self.stats.clone(),
        }
    }
}

fn emit(events: &broadcast::Sender<SessionEvent>, kind: EventKind) {
    // Fails only when nobody is subscribed.
    let _ = events.send(SessionEvent::now(kind));
}

// ---------------------------------------------------------------------------
// Round worker
// ---------------------------------------------------------------------------

struct RoundWorker {
    executor: RoundExecutor,
    view: Arc<watch::Sender<SessionView>>,
    events: broadcast::Sender<SessionEvent>,
    delay: Duration,
    epoch: u64,
    epoch_rx: watch::Receiver<u64>,
}

impl RoundWorker {
    fn is_active(&self) -> bool {
        *self.epoch_rx.borrow() == self.epoch
    }

    async fn run(mut self, mut session: Session) -> Session {
        let reason = self.run_rounds(&mut session).await;

        info!(reason = %reason, stats = %session.stats, "Session stopped");
        emit(&self.events, EventKind::Stopped { reason });
        self.view.send_modify(|v| *v = session.view(RunState::Idle));
        session
    }

    async fn run_rounds(&mut self, session: &mut Session) -> StopReason {
        loop {
            if !self.is_active() {
                return StopReason::UserRequest;
            }

            let refresh = session.monitor.before_round().await;
            self.report_refresh(refresh);
            // The refresh may have raced a stop.
            if !self.is_active() {
                return StopReason::UserRequest;
            }

            let round = self
                .executor
                .execute_round(&session.config, &session.strategy, session.monitor.current())
                .await;

            match round {
                Ok(outcome) => {
                    session.strategy = outcome.next_state;
                    session.stats.record(outcome.result.clone());
                    emit(&self.events, EventKind::RoundSettled { result: outcome.result });

                    let refresh = session.monitor.refresh().await;
                    self.report_refresh(refresh);
                    self.publish(session);

                    if outcome.decision == Decision::Stop {
                        return StopReason::StopOnWin;
                    }
                }
                Err(err) => {
                    let amount = session.strategy.next_stake;
                    let fatal = err.is_fatal();
                    emit(
                        &self.events,
                        EventKind::RoundFailed {
                            amount,
                            message: err.to_string(),
                            fatal,
                        },
                    );

                    if fatal {
                        warn!(error = %err, "Stopping session: insufficient balance");
                        if let RoundError::FundsRejected(_) = err {
                            let refresh = session.monitor.refresh().await;
                            self.report_refresh(refresh);
                        }
                        return StopReason::InsufficientBalance;
                    }
                    self.publish(session);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                changed = self.epoch_rx.changed() => {
                    if changed.is_err() {
                        // Controller dropped.
                        return StopReason::UserRequest;
                    }
                }
            }
        }
    }

    /// Publish the latest session state without touching the run state,
    /// which `stop()` may have moved to `Stopping` meanwhile.
    fn publish(&self, session: &Session) {
        self.view.send_modify(|v| {
            let run_state = v.run_state;
            *v = session.view(run_state);
        });
    }

    fn report_refresh(&self, refresh: Refresh) {
        match refresh {
            Refresh::Skipped | Refresh::CurrencyMissing => {}
            Refresh::Updated(balance) => {
                emit(&self.events, EventKind::BalanceUpdated { balance });
            }
            Refresh::Failed(e) => {
                emit(
                    &self.events,
                    EventKind::BalanceRefreshFailed {
                        message: e.to_string(),
                    },
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct SessionController {
    service: Arc<dyn WagerService>,
    settings: EngineSettings,
    view: Arc<watch::Sender<SessionView>>,
    events: broadcast::Sender<SessionEvent>,
    epoch: watch::Sender<u64>,
    /// Supervisor of the running (or draining) worker.
    worker: Mutex<Option<JoinHandle<Option<Session>>>>,
    gate: StdMutex<StartGate>,
}

/// Hand-off between `start()` and a concurrent `stop()`.
#[derive(Default)]
struct StartGate {
    starting: bool,
    stop_requested: bool,
}

fn lock_gate(gate: &StdMutex<StartGate>) -> MutexGuard<'_, StartGate> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a start in progress; cleared on every exit path, cancellation
/// included.
struct StartGuard<'a> {
    gate: &'a StdMutex<StartGate>,
}

impl<'a> StartGuard<'a> {
    fn begin(gate: &'a StdMutex<StartGate>) -> Self {
        let mut state = lock_gate(gate);
        state.starting = true;
        state.stop_requested = false;
        Self { gate }
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        lock_gate(self.gate).starting = false;
    }
}

impl SessionController {
    pub fn new(service: Arc<dyn WagerService>, settings: EngineSettings) -> Self {
        let (view, _) = watch::channel(SessionView::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (epoch, _) = watch::channel(0u64);
        Self {
            service,
            settings,
            view: Arc::new(view),
            events,
            epoch,
            worker: Mutex::new(None),
            gate: StdMutex::new(StartGate::default()),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.service.name()
    }

    pub fn run_state(&self) -> RunState {
        self.view.borrow().run_state
    }

    /// Current snapshot of the session.
    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Continuously updated view for the presentation layer.
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Timestamped notifications: settled rounds, failures, stops.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start (or resume) betting with `config`.
    ///
    /// Statistics from a previous run are kept until `reset()`. If the
    /// previous worker is still finishing an in-flight round, this waits
    /// for it before the first new wager goes out.
    pub async fn start(&self, config: SessionConfig) -> Result<(), SessionError> {
        let mut worker = self.worker.lock().await;

        let state = self.run_state();
        if state == RunState::Running {
            return Err(SessionError::InvalidState {
                operation: "start",
                state,
            });
        }
        config.validate()?;
        if !self.service.is_connected() {
            return Err(SessionError::InvalidConfig(format!(
                "{} service has no access credential",
                self.service.name()
            )));
        }

        let _starting = StartGuard::begin(&self.gate);
        let refresh_every = self.settings.balance_refresh_every;
        let session = match self.drain(&mut worker).await {
            Some(previous) => previous.resume(config, self.service.clone(), refresh_every),
            None => Session::new(config, self.service.clone(), refresh_every),
        };

        let mut epoch = 0;
        self.epoch.send_modify(|e| {
            *e += 1;
            epoch = *e;
        });

        info!(
            config = %session.config,
            service = self.service.name(),
            rounds_so_far = session.stats.round_count,
            "Session started"
        );
        // Publishing under the gate orders this against `stop()`: either
        // the stop sees Running, or it was recorded while we drained.
        let stop_requested = {
            let mut gate = lock_gate(&self.gate);
            gate.starting = false;
            self.view.send_replace(session.view(RunState::Running));
            std::mem::take(&mut gate.stop_requested)
        };
        emit(
            &self.events,
            EventKind::Started {
                config: session.config.clone(),
            },
        );

        let round_worker = RoundWorker {
            executor: RoundExecutor::new(self.service.clone()),
            view: self.view.clone(),
            events: self.events.clone(),
            delay: self.settings.inter_round_delay,
            epoch,
            epoch_rx: self.epoch.subscribe(),
        };
        *worker = Some(self.spawn_worker(round_worker, session));

        if stop_requested {
            info!("Stop arrived while starting");
            self.stop();
        }
        Ok(())
    }

    /// Request a stop. The pending round is cancelled; a round in flight
    /// still completes and is recorded. No-op unless running or starting.
    pub fn stop(&self) {
        let mut gate = lock_gate(&self.gate);
        if gate.starting {
            gate.stop_requested = true;
            debug!("Stop deferred until start completes");
            return;
        }

        let requested = self.view.send_if_modified(|v| {
            if v.run_state == RunState::Running {
                v.run_state = RunState::Stopping;
                true
            } else {
                false
            }
        });

        drop(gate);

        if requested {
            self.epoch.send_modify(|e| *e += 1);
            info!("Stop requested");
        } else {
            debug!(state = %self.run_state(), "Stop ignored, session not running");
        }
    }

    /// Clear statistics and staking progress. Only allowed when idle.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let mut worker = self.worker.lock().await;

        let state = self.run_state();
        if state != RunState::Idle {
            return Err(SessionError::InvalidState {
                operation: "reset",
                state,
            });
        }

        self.drain(&mut worker).await;
        self.view.send_replace(SessionView::default());
        info!("Session statistics reset");
        Ok(())
    }

    /// Wait until no session is running.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.view.subscribe();
        // The sender lives in `self`, so this only ends on Idle.
        let _ = rx.wait_for(|v| v.run_state == RunState::Idle).await;
    }

    /// Stop and wait for the worker to hand back the session.
    pub async fn shutdown(&self) -> SessionView {
        self.stop();
        let mut worker = self.worker.lock().await;
        self.drain(&mut worker).await;
        self.snapshot()
    }

    fn spawn_worker(&self, round_worker: RoundWorker, session: Session) -> JoinHandle<Option<Session>> {
        let view = self.view.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            match tokio::spawn(round_worker.run(session)).await {
                Ok(session) => Some(session),
                Err(e) => {
                    error!(error = %e, "Round worker crashed");
                    emit(
                        &events,
                        EventKind::Stopped {
                            reason: StopReason::Fatal(e.to_string()),
                        },
                    );
                    view.send_modify(|v| v.run_state = RunState::Idle);
                    None
                }
            }
        })
    }

    /// Wait for the current worker, if any, and take its session back.
    async fn drain(&self, worker: &mut Option<JoinHandle<Option<Session>>>) -> Option<Session> {
        let handle = worker.take()?;
        match handle.await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Worker supervisor failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
