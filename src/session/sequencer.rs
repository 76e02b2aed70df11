use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::core::duration::DurationRule;
use crate::core::sign::Sign;
use crate::core::timebase::{SessionClock, sec_to_duration};
use crate::hardware::HardwareBridge;
use crate::hardware::monitor::{ResponseMonitor, WaitOutcome};
use crate::session::SessionError;
use crate::stimulus::renderer::RendererHandle;
use crate::stimulus::{EpochArgs, EpochKind};
use crate::task::scheduler::{
    EpochTiming, Outcome, SchedulerError, TrialParameters, TrialRecord, TrialScheduler,
    TrialTiming,
};

const BOTH_SIDES: [Sign; 2] = [Sign::Left, Sign::Right];
/// Stand-in deadline for an unbounded wait; the stop flag still ends it.
const FOREVER: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stopped,
}

/// Response picked up in the stimulus window.
#[derive(Debug, Clone, Copy, Default)]
struct Choice {
    side: Option<Sign>,
    response_time: Option<f64>,
}

/// Per-trial state carried from one epoch to the next.
#[derive(Debug, Default)]
struct TrialRun {
    params: Option<TrialParameters>,
    choice: Choice,
    reward_ul: f64,
    reward_fault: bool,
    timing: TrialTiming,
}

/// Walks the configured epoch order once per trial.
///
/// Runs on the orchestrating thread. It blocks only on response waits and
/// timed holds, both of which wake on the stop flag.
pub struct EpochSequencer {
    config: Arc<SessionConfig>,
    scheduler: TrialScheduler,
    renderer: RendererHandle,
    monitor: ResponseMonitor,
    bridge: Arc<dyn HardwareBridge>,
    clock: SessionClock,
    stop: Arc<AtomicBool>,
    rng: StdRng,
}

impl EpochSequencer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SessionConfig>,
        scheduler: TrialScheduler,
        renderer: RendererHandle,
        monitor: ResponseMonitor,
        bridge: Arc<dyn HardwareBridge>,
        clock: SessionClock,
        stop: Arc<AtomicBool>,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            scheduler,
            renderer,
            monitor,
            bridge,
            clock,
            stop,
            rng,
        }
    }

    pub fn scheduler(&self) -> &TrialScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut TrialScheduler {
        &mut self.scheduler
    }

    pub fn monitor(&self) -> &ResponseMonitor {
        &self.monitor
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// One full trial. `Ok(None)` when the stop flag ended it before the
    /// outcome was known; the schedule entry is then back at the front.
    pub fn run_trial(&mut self) -> Result<Option<TrialRecord>, SessionError> {
        let order = self.config.epochs.order.clone();
        let mut run = TrialRun::default();
        let result = self.run_epochs(&order, &mut run);

        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stopped) => {
                if self.scheduler.current_outcome().is_none() {
                    self.scheduler.abandon_trial();
                    debug!(target: "sequencer", "stopped before outcome; trial abandoned");
                    return Ok(None);
                }
                debug!(target: "sequencer", "stopped after outcome; finalizing early");
            }
            Err(e) => {
                self.scheduler.abandon_trial();
                return Err(e);
            }
        }
        let record = self.scheduler.finalize_trial(run.timing)?;
        Ok(Some(record))
    }

    fn run_epochs(&mut self, order: &[EpochKind], run: &mut TrialRun) -> Result<Flow, SessionError> {
        for &epoch in order {
            if self.stopped() {
                return Ok(Flow::Stopped);
            }
            let onset = self.clock.now();
            let flow = match epoch {
                EpochKind::Fixation => self.fixation(run)?,
                EpochKind::Stimulus => self.stimulus(run)?,
                EpochKind::Reinforcement => self.reinforcement(run)?,
                EpochKind::Delay => self.delay()?,
                EpochKind::MustRespond => self.must_respond(run)?,
                EpochKind::Intertrial => self.intertrial()?,
            };
            let end = self.clock.now();
            run.timing.epochs.insert(
                epoch,
                EpochTiming {
                    onset,
                    duration: end - onset,
                },
            );
            trace!(target: "sequencer", "{epoch} {:.3}s", end - onset);
            if flow == Flow::Stopped {
                return Ok(Flow::Stopped);
            }
        }
        Ok(Flow::Continue)
    }

    /// Look the epoch up in the renderer table and send its command.
    fn enter(&mut self, epoch: EpochKind, args: EpochArgs) -> Result<(), SessionError> {
        let cmd = self
            .config
            .display
            .epochs
            .command(epoch, args)
            .ok_or(SessionError::UnknownEpoch(epoch))?;
        self.renderer
            .send(cmd)
            .map_err(|_| SessionError::RendererGone)?;
        Ok(())
    }

    /// Interruptible sleep. A window accepting nothing never latches.
    fn hold(&self, duration: Duration) -> Result<Flow, SessionError> {
        match self.monitor.arm_and_wait(&[], Instant::now() + duration)? {
            WaitOutcome::Interrupted { .. } => Ok(Flow::Stopped),
            _ => Ok(Flow::Continue),
        }
    }

    fn sample(&mut self, rule: &DurationRule) -> Duration {
        let ctx = self.scheduler.duration_context();
        sec_to_duration(rule.sample(&ctx, &mut self.rng))
    }

    /// NoGo hold: any response restarts the full hold when so configured.
    fn fixation(&mut self, run: &mut TrialRun) -> Result<Flow, SessionError> {
        let params = self.scheduler.prepare_trial();
        run.params = Some(params);
        self.enter(EpochKind::Fixation, EpochArgs::default())?;

        let cfg = Arc::clone(&self.config);
        let hold = self.sample(&cfg.epochs.fixation.duration);
        if !cfg.epochs.fixation.restart_on_response {
            return self.hold(hold);
        }
        loop {
            let out = self
                .monitor
                .arm_and_wait(&BOTH_SIDES, Instant::now() + hold)?;
            match out {
                WaitOutcome::Responded { side, .. } => {
                    run.timing.fixation_restarts += 1;
                    trace!(target: "sequencer", "response on {side} during fixation; restarting");
                }
                WaitOutcome::TimedOut { .. } => return Ok(Flow::Continue),
                WaitOutcome::Interrupted { .. } => return Ok(Flow::Stopped),
            }
        }
    }

    /// GO window from `min_viewing` to `max_viewing` after onset, or a
    /// fixed passive presentation when responses are not accepted.
    fn stimulus(&mut self, run: &mut TrialRun) -> Result<Flow, SessionError> {
        let params = run.params.ok_or(SchedulerError::NoActiveTrial)?;
        self.enter(
            EpochKind::Stimulus,
            EpochArgs {
                seed: Some(params.seed),
                signed_coherence: Some(params.signed_coherence),
                target: Some(params.target),
                outcome: None,
            },
        )?;
        let onset_at = Instant::now();
        let onset = self.clock.instant_to_sec(onset_at);

        let cfg = Arc::clone(&self.config);
        let window = &cfg.epochs.stimulus;
        if !cfg.training.training_type.accepts_responses() {
            let d = self.sample(&window.passive_viewing);
            return self.hold(d);
        }

        let min_viewing = sec_to_duration(window.min_viewing);
        if !min_viewing.is_zero() && self.hold(min_viewing)? == Flow::Stopped {
            return Ok(Flow::Stopped);
        }
        let deadline = onset_at + sec_to_duration(window.max_viewing);
        match self.monitor.arm_and_wait(&BOTH_SIDES, deadline)? {
            WaitOutcome::Responded { side, at, .. } => {
                run.choice = Choice {
                    side: Some(side),
                    response_time: Some((at - onset).max(0.0)),
                };
                run.timing.response_onset = Some(at);
                Ok(Flow::Continue)
            }
            WaitOutcome::TimedOut { .. } => Ok(Flow::Continue),
            WaitOutcome::Interrupted { .. } => Ok(Flow::Stopped),
        }
    }

    fn reinforcement(&mut self, run: &mut TrialRun) -> Result<Flow, SessionError> {
        let params = run.params.ok_or(SchedulerError::NoActiveTrial)?;
        let mut eval = self
            .scheduler
            .evaluate_outcome(run.choice.side, run.choice.response_time)?;

        if eval.reward_volume > 0.0 {
            if let Err(e) = self.bridge.deliver_reward(params.target, eval.reward_volume) {
                warn!(target: "sequencer", "{e}; trial scored as no response");
                eval = self.scheduler.reward_failed()?;
                run.reward_fault = true;
            }
        }
        run.reward_ul = eval.reward_volume;

        self.enter(
            EpochKind::Reinforcement,
            EpochArgs {
                target: Some(params.target),
                outcome: Some(eval.outcome),
                ..EpochArgs::default()
            },
        )?;
        debug!(
            target: "sequencer",
            "outcome {:?} choice {:?} reward {:.2} uL",
            eval.outcome,
            run.choice.side,
            eval.reward_volume
        );

        let cfg = Arc::clone(&self.config);
        let total = self.sample(cfg.epochs.reinforcement.durations.rule(eval.outcome));
        let kor = sec_to_duration(cfg.epochs.reinforcement.knowledge_of_results).min(total);
        if kor.is_zero() {
            return self.hold(total);
        }

        let lit = match self.bridge.set_indicator(params.target, true) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "sequencer", "{e}; knowledge of results skipped");
                false
            }
        };
        let flow = self.hold(kor)?;
        if lit {
            if let Err(e) = self.bridge.set_indicator(params.target, false) {
                warn!(target: "sequencer", "{e}; indicator left on");
            }
        }
        if flow == Flow::Stopped {
            return Ok(Flow::Stopped);
        }
        self.hold(total.saturating_sub(kor))
    }

    fn delay(&mut self) -> Result<Flow, SessionError> {
        let outcome = self.outcome()?;
        self.enter(EpochKind::Delay, EpochArgs::default())?;
        let cfg = Arc::clone(&self.config);
        let d = self.sample(cfg.epochs.delay.rule(outcome));
        self.hold(d)
    }

    /// Wait for the subject to collect a delivered reward on the rewarded side.
    fn must_respond(&mut self, run: &mut TrialRun) -> Result<Flow, SessionError> {
        let params = run.params.ok_or(SchedulerError::NoActiveTrial)?;
        self.enter(EpochKind::MustRespond, EpochArgs::default())?;
        let consume = self.config.training.must_consume_reward;
        if !consume || run.reward_ul <= 0.0 || run.reward_fault {
            return Ok(Flow::Continue);
        }
        let limit = match self.config.epochs.must_respond.timeout {
            Some(t) => sec_to_duration(t),
            None => FOREVER,
        };
        match self
            .monitor
            .arm_and_wait(&[params.target], Instant::now() + limit)?
        {
            WaitOutcome::Responded { .. } => Ok(Flow::Continue),
            WaitOutcome::TimedOut { .. } => {
                debug!(target: "sequencer", "reward on {} not collected", params.target);
                Ok(Flow::Continue)
            }
            WaitOutcome::Interrupted { .. } => Ok(Flow::Stopped),
        }
    }

    fn intertrial(&mut self) -> Result<Flow, SessionError> {
        let outcome = self.outcome()?;
        self.enter(EpochKind::Intertrial, EpochArgs::default())?;
        let cfg = Arc::clone(&self.config);
        let d = self.sample(cfg.epochs.intertrial.rule(outcome));
        self.hold(d)
    }

    fn outcome(&self) -> Result<Outcome, SessionError> {
        self.scheduler
            .current_outcome()
            .ok_or_else(|| SchedulerError::NotEvaluated.into())
    }
}
