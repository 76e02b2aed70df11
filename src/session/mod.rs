//! One training session: load subject state, run trials, persist.

pub mod logger;
pub mod sequencer;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, SessionConfig};
use crate::core::timebase::SessionClock;
use crate::hardware::monitor::{MonitorError, ResponseMonitor};
use crate::hardware::{HardwareBridge, HardwareError};
use crate::session::logger::{ResponseLog, TrialLogger};
use crate::session::sequencer::EpochSequencer;
use crate::session::store::{SessionSummary, StoreError, SubjectState, SubjectStore};
use crate::stimulus::EpochKind;
use crate::stimulus::display::{Display, DisplayError};
use crate::stimulus::renderer::RendererHandle;
use crate::task::scheduler::{SchedulerError, SchedulerState, TrialRecord, TrialScheduler};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("epoch {0} has no entry in the display epoch table")]
    UnknownEpoch(EpochKind),
    #[error("stimulus renderer is no longer running")]
    RendererGone,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("trial log: {0}")]
    Log(#[source] std::io::Error),
    #[error("failed to start session thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A running session. Threads are started by [`Session::start`] and joined
/// when the session is dropped.
pub struct Session {
    config: Arc<SessionConfig>,
    store: SubjectStore,
    state: SubjectState,
    clock: SessionClock,
    stop: Arc<AtomicBool>,
    sequencer: EpochSequencer,
    trial_log: TrialLogger,
    // Dropped after the sequencer so the monitor's sender closes first.
    response_log: ResponseLog,
}

impl Session {
    pub fn start(
        config: Arc<SessionConfig>,
        bridge: Arc<dyn HardwareBridge>,
        mut display: Box<dyn Display>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        bridge.connect()?;
        display.open()?;
        debug!("rig and display connected");
        let subject = &config.subject;
        let store = SubjectStore::new(&config.session.data_dir, &subject.name);
        let state = match store.load()? {
            Some(state) => {
                info!(
                    "subject {}: session {} (attempts so far {})",
                    subject.name,
                    state.session_count + 1,
                    state.total_attempts
                );
                state
            }
            None => {
                info!("subject {}: no saved state; starting fresh", subject.name);
                SubjectState::new(SchedulerState::fresh(&config))
            }
        };

        let mut scheduler = TrialScheduler::new(Arc::clone(&config), state.scheduler.clone())?;
        if let Some(inputs) = state.homeostasis_inputs(subject.weight_pct()) {
            scheduler.update_reward_volume(&inputs);
        }

        let day_dir = store.dir().join(format!("day{:03}", subject.session_day));
        let trial_log =
            TrialLogger::create(day_dir.join("trials.jsonl")).map_err(SessionError::Log)?;
        let response_log =
            ResponseLog::create(day_dir.join("responses.csv")).map_err(SessionError::Log)?;

        let clock = SessionClock::start();
        let monitor = ResponseMonitor::spawn(
            Arc::clone(&bridge),
            &config.monitor,
            clock,
            Arc::clone(&stop),
            response_log.sender(),
        )?;
        let renderer = RendererHandle::spawn(display, &config.display).map_err(SessionError::Spawn)?;
        let rng = match config.session.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };
        let sequencer = EpochSequencer::new(
            Arc::clone(&config),
            scheduler,
            renderer,
            monitor,
            bridge,
            clock,
            Arc::clone(&stop),
            rng,
        );

        Ok(Self {
            config,
            store,
            state,
            clock,
            stop,
            sequencer,
            trial_log,
            response_log,
        })
    }

    pub fn scheduler(&self) -> &TrialScheduler {
        self.sequencer.scheduler()
    }

    pub fn sequencer(&self) -> &EpochSequencer {
        &self.sequencer
    }

    pub fn log_dir(&self) -> PathBuf {
        self.store
            .dir()
            .join(format!("day{:03}", self.config.subject.session_day))
    }

    /// Run and log one trial. `Ok(None)` once stop has been requested.
    pub fn run_trial(&mut self) -> Result<Option<TrialRecord>, SessionError> {
        let Some(record) = self.sequencer.run_trial()? else {
            return Ok(None);
        };
        self.trial_log.log(&record).map_err(SessionError::Log)?;
        info!(
            "trial {} coh {:+} {:?} choice {} rt {} reward {:.2} uL",
            record.attempt_index,
            record.signed_coherence,
            record.outcome,
            record
                .choice
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            record
                .response_time
                .map_or_else(|| "-".to_string(), |rt| format!("{rt:.3}")),
            record.trial_reward
        );
        Ok(Some(record))
    }

    /// Trial loop until `max_trials` or the stop flag.
    pub fn run(&mut self) -> Result<u64, SessionError> {
        let max = self.config.session.max_trials;
        let mut completed = 0u64;
        while !self.stop.load(Ordering::SeqCst) && max.is_none_or(|m| completed < m) {
            if self.run_trial()?.is_some() {
                completed += 1;
            }
        }
        Ok(completed)
    }

    pub fn summary(&self) -> SessionSummary {
        let scheduler = self.scheduler();
        let counters = scheduler.counters();
        SessionSummary {
            session_day: self.config.subject.session_day,
            attempts: counters.attempt,
            valid: counters.valid,
            correct: counters.correct,
            percent_correct: counters.percent_correct(),
            total_reward_ul: scheduler.total_reward(),
            reward_volume_ul: scheduler.reward_volume(),
            duration_s: self.clock.now(),
        }
    }

    /// Persist the subject state and shut every thread down.
    pub fn finish(mut self) -> Result<SessionSummary, SessionError> {
        let summary = self.summary();
        let snapshot = self.scheduler().snapshot();
        self.state.record_session(snapshot, summary.clone());
        self.store.save(&self.state)?;
        self.trial_log.close();
        info!(
            "session saved: {} attempts, {} valid, {:.1} uL delivered",
            summary.attempts, summary.valid, summary.total_reward_ul
        );
        Ok(summary)
    }
}
