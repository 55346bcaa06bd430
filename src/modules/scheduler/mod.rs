//! Session scheduling.
//!
//! One tokio task per run sleeps for a jittered page-level delay, runs a
//! cycle, and loops. Cycles never overlap; requests dispatched by a cycle run
//! as their own tasks so a slow target never delays the next wake-up.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::events::{EngineEvent, EventDispatcher, StoppedEvent};
use super::orchestrator::{RequestKind, RequestOrchestrator};
use super::stats::StatsReporter;
use super::targets::SharedTargets;
use super::timing::JitterPolicy;
use crate::config::AuxiliaryConfig;

/// Lifecycle of one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TargetsExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::TargetsExhausted => f.write_str("no targets left"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no eligible targets after filtering")]
    NoTargets,
    #[error("scheduler is already running")]
    AlreadyRunning,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A primary request went out for this target.
    Visited(String),
    /// The run ended; the loop must not re-arm.
    Halted(StopReason),
}

/// Drives recurring primary visits and the auxiliary triggers.
pub struct SessionScheduler {
    state: Mutex<RunState>,
    task: Mutex<Option<JoinHandle<()>>>,
    targets: SharedTargets,
    orchestrator: Arc<RequestOrchestrator>,
    stats: StatsReporter,
    jitter: JitterPolicy,
    auxiliary: AuxiliaryConfig,
    events: Arc<EventDispatcher>,
}

impl SessionScheduler {
    pub fn new(
        targets: SharedTargets,
        orchestrator: Arc<RequestOrchestrator>,
        stats: StatsReporter,
        jitter: JitterPolicy,
        auxiliary: AuxiliaryConfig,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let auxiliary = AuxiliaryConfig {
            form_submit_probability: usable_probability(auxiliary.form_submit_probability),
            beacon_probability: usable_probability(auxiliary.beacon_probability),
            ..auxiliary
        };
        Self {
            state: Mutex::new(RunState::Idle),
            task: Mutex::new(None),
            targets,
            orchestrator,
            stats,
            jitter,
            auxiliary,
            events,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().expect("run state lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Arms the first cycle after an initial page-level delay.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().expect("run state lock poisoned");
        if *state == RunState::Running {
            return Err(SchedulerError::AlreadyRunning);
        }
        let targets = self.targets.snapshot();
        if targets.is_empty() {
            return Err(SchedulerError::NoTargets);
        }
        *state = RunState::Running;
        drop(state);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        if let Some(previous) = self
            .task
            .lock()
            .expect("scheduler task lock poisoned")
            .replace(handle)
        {
            previous.abort();
        }

        log::info!("scheduler started with {} target(s)", targets.len());
        self.events.dispatch(EngineEvent::Started {
            targets: targets.len(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let delay = self.jitter.page_delay();
            log::trace!("next cycle in {:.1}s", delay.as_secs_f64());
            sleep(delay).await;
            if let CycleOutcome::Halted(reason) = self.run_cycle() {
                log::debug!("scheduler loop exiting: {reason}");
                break;
            }
        }
    }

    /// One wake-up. Exposed so callers can drive cycles without the timer.
    pub fn run_cycle(&self) -> CycleOutcome {
        if !self.is_running() {
            return CycleOutcome::Halted(StopReason::Requested);
        }

        let targets = self.targets.snapshot();
        let Some(target) = targets.choose().map(str::to_string) else {
            log::warn!("target set is empty; stopping");
            self.halt(StopReason::TargetsExhausted);
            return CycleOutcome::Halted(StopReason::TargetsExhausted);
        };

        log::debug!("visiting {target}");
        self.orchestrator.dispatch(&target, RequestKind::Primary);
        self.stats.record_visit(&target);
        self.roll_auxiliary();
        CycleOutcome::Visited(target)
    }

    fn roll_auxiliary(&self) {
        let (form, beacon) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(self.auxiliary.form_submit_probability),
                rng.gen_bool(self.auxiliary.beacon_probability),
            )
        };
        if form && let Some(target) = self.targets.snapshot().choose() {
            self.orchestrator.dispatch(target, RequestKind::FormSubmit);
        }
        if beacon {
            self.orchestrator
                .dispatch(self.auxiliary.beacon_endpoint.as_str(), RequestKind::Beacon);
        }
    }

    /// Cancels the pending re-arm and releases the transport. Idempotent.
    pub fn stop(&self) {
        if self.halt(StopReason::Requested) {
            log::info!("scheduler stopped");
        }
    }

    /// Returns whether this call performed the transition.
    fn halt(&self, reason: StopReason) -> bool {
        {
            let mut state = self.state.lock().expect("run state lock poisoned");
            if *state != RunState::Running {
                return false;
            }
            *state = RunState::Stopping;
        }

        // May be the calling task itself; it stops at its next await.
        if let Some(handle) = self.task.lock().expect("scheduler task lock poisoned").take() {
            handle.abort();
        }
        self.orchestrator.release_transport();

        *self.state.lock().expect("run state lock poisoned") = RunState::Idle;
        self.events.dispatch(EngineEvent::Stopped(StoppedEvent {
            reason,
            timestamp: Utc::now(),
        }));
        true
    }
}

/// `gen_bool` panics outside `[0, 1]`; non-finite values disable the trigger.
fn usable_probability(p: f64) -> f64 {
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

impl Drop for SessionScheduler {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}
