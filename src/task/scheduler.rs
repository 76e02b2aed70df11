use std::collections::BTreeMap;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, SessionConfig};
use crate::core::duration::DurationContext;
use crate::core::sign::Sign;
use crate::core::timebase::Seconds;
use crate::stimulus::EpochKind;
use crate::task::bias::RollingBias;
use crate::task::block::{
    BlockSchedule, EntryKind, ScheduleStructure, ScheduledTrial, generate_active_block,
    generate_block,
};
use crate::task::graduation::GraduationState;
use crate::task::performance::{
    CoherenceKey, PlotAggregates, RollingPerformance, RunningAccuracy, TrialCounters,
};
use crate::task::reward::{HomeostasisInputs, NoResponseRewardPolicy, homeostatic_volume};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    NoResponse,
    /// Excluded from adaptive statistics (active bias-correction trials).
    Invalid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrainingType {
    /// Stimulus is watched, never answered; reward follows on the target.
    PassiveOnly,
    /// Responses are accepted; a missed trial is still (partly) rewarded.
    ActivePassive,
    /// Responses are required; missed trials are repeated.
    #[default]
    ActiveOnly,
}

impl TrainingType {
    pub fn accepts_responses(self) -> bool {
        !matches!(self, TrainingType::PassiveOnly)
    }

    pub fn default_noresponse_policy(self) -> NoResponseRewardPolicy {
        match self {
            TrainingType::PassiveOnly => NoResponseRewardPolicy::Full,
            TrainingType::ActivePassive => NoResponseRewardPolicy::Half,
            TrainingType::ActiveOnly => NoResponseRewardPolicy::None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no trial has been prepared")]
    NoActiveTrial,
    #[error("trial outcome was never evaluated")]
    NotEvaluated,
}

/// Everything the rest of a trial needs to know about it. Fixed once the
/// fixation epoch starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialParameters {
    pub seed: u64,
    pub signed_coherence: f64,
    pub target: Sign,
    pub is_correction_trial: bool,
    pub is_repeat_trial: bool,
    pub in_active_block: bool,
    pub coherence_level: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    /// Volume to deliver on the target side; zero means no reward.
    pub reward_volume: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextTrialFlags {
    pub is_correction_trial: bool,
    pub is_repeat_trial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochTiming {
    pub onset: Seconds,
    pub duration: Seconds,
}

/// Timing gathered by the sequencer while the trial ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialTiming {
    pub epochs: BTreeMap<EpochKind, EpochTiming>,
    pub fixation_restarts: u32,
    pub response_onset: Option<Seconds>,
}

/// One line of the trial log; enough to rebuild the session offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub attempt_index: u64,
    pub valid_index: u64,
    pub correction_index: u64,
    pub is_correction_trial: bool,
    pub is_repeat_trial: bool,
    pub in_active_block: bool,
    pub signed_coherence: f64,
    pub target: Sign,
    pub choice: Option<Sign>,
    pub response_time: Option<f64>,
    pub response_onset: Option<Seconds>,
    pub valid: bool,
    pub outcome: Outcome,
    pub trial_reward: f64,
    pub reward_volume: f64,
    pub reward_fault: bool,
    pub total_reward: f64,
    pub coherence_level: usize,
    pub fixation_restarts: u32,
    pub epochs: BTreeMap<EpochKind, EpochTiming>,
    pub stimulus_seed: u64,
    pub next_trial: NextTrialFlags,
    pub running_accuracy: Option<RunningAccuracy>,
}

/// The part of the scheduler that outlives a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub rolling_performance: RollingPerformance,
    pub reward_volume_ul: f64,
    #[serde(default)]
    pub graduation: GraduationState,
}

impl SchedulerState {
    pub fn fresh(cfg: &SessionConfig) -> Self {
        Self {
            rolling_performance: RollingPerformance::new(
                cfg.rolling_performance.window,
                &cfg.stimulus.signed_coherences,
            ),
            reward_volume_ul: cfg.reward.initial_volume_ul,
            graduation: GraduationState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Evaluated {
    choice: Option<Sign>,
    response_time: Option<f64>,
    outcome: Outcome,
    reward: f64,
    reward_fault: bool,
}

#[derive(Debug, Clone, Copy)]
struct ActiveTrial {
    entry: ScheduledTrial,
    params: TrialParameters,
    evaluation: Option<Evaluated>,
}

/// Adaptive trial selection and bookkeeping for one session.
///
/// Single writer: the sequencer thread owns it. No I/O besides tracing.
pub struct TrialScheduler {
    config: Arc<SessionConfig>,
    rng: StdRng,
    schedule: BlockSchedule,
    bias: RollingBias,
    performance: RollingPerformance,
    counters: TrialCounters,
    plots: PlotAggregates,
    graduation: GraduationState,
    active_coherences: Vec<f64>,
    in_active_block: bool,
    reward_volume: f64,
    total_reward: f64,
    last_valid_outcome: Option<Outcome>,
    current: Option<ActiveTrial>,
}

impl TrialScheduler {
    pub fn new(config: Arc<SessionConfig>, state: SchedulerState) -> Result<Self, ConfigError> {
        let rng = match config.session.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(config, state, rng)
    }

    pub fn with_rng(
        config: Arc<SessionConfig>,
        state: SchedulerState,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let SchedulerState {
            mut rolling_performance,
            reward_volume_ul,
            mut graduation,
        } = state;
        rolling_performance.reconcile(
            config.rolling_performance.window,
            &config.stimulus.signed_coherences,
        );
        graduation.clamp_to(&config.stimulus.coherence_levels);

        let plot_coherences: Vec<f64> = config
            .stimulus
            .coherences
            .iter()
            .flat_map(|&c| [-c.abs(), c.abs()])
            .chain(config.stimulus.signed_coherences.iter().copied())
            .collect();

        let reward = &config.reward;
        let reward_volume = if reward_volume_ul.is_finite() {
            reward_volume_ul.clamp(reward.min_volume_ul, reward.max_volume_ul)
        } else {
            reward.initial_volume_ul
        };

        let mut scheduler = Self {
            rng,
            schedule: BlockSchedule::new(config.stimulus.max_repeat),
            bias: RollingBias::new(config.bias_correction.bias_window),
            performance: rolling_performance,
            counters: TrialCounters::default(),
            plots: PlotAggregates::new(&plot_coherences),
            graduation,
            active_coherences: Vec::new(),
            in_active_block: false,
            reward_volume,
            total_reward: 0.0,
            last_valid_outcome: None,
            current: None,
            config,
        };
        scheduler.active_coherences = scheduler.coherences_for_level();
        Ok(scheduler)
    }

    fn coherences_for_level(&self) -> Vec<f64> {
        let stimulus = &self.config.stimulus;
        match stimulus.coherence_levels.get(self.graduation.level) {
            Some(level) => stimulus
                .signed_coherences
                .iter()
                .copied()
                .filter(|&c| {
                    level
                        .iter()
                        .any(|&m| CoherenceKey::magnitude(m) == CoherenceKey::magnitude(c))
                })
                .collect(),
            None => stimulus.signed_coherences.clone(),
        }
    }

    pub fn noresponse_policy(&self) -> NoResponseRewardPolicy {
        self.config.training.noresponse_policy()
    }

    /// Session-start volume from the persisted inputs; same inputs, same volume.
    pub fn update_reward_volume(&mut self, inputs: &HomeostasisInputs) -> f64 {
        let reward = &self.config.reward;
        let volume = homeostatic_volume(
            &reward.homeostasis,
            inputs,
            reward.min_volume_ul,
            reward.max_volume_ul,
        );
        info!(
            target: "scheduler",
            "reward volume {:.2} -> {:.2} uL (weight {:.1}%, intake {:.1} uL, attempts {})",
            inputs.previous_volume_ul,
            volume,
            inputs.weight_pct,
            inputs.previous_total_reward_ul,
            inputs.previous_attempts
        );
        self.reward_volume = volume;
        volume
    }

    pub fn prepare_trial(&mut self) -> TrialParameters {
        if let Some(active) = &self.current {
            debug!(target: "scheduler", "prepare_trial called twice; keeping current trial");
            return active.params;
        }

        let next_is_repeat = self.schedule.front().is_some_and(|e| e.repeat);
        let threshold = self.config.bias_correction.active_abs_bias_threshold;
        if !self.in_active_block && !next_is_repeat && self.bias.mean().abs() >= threshold {
            self.start_active_block();
        }
        if self.schedule.is_empty() {
            self.regenerate_block();
        }

        let entry = match self.schedule.pop_front() {
            Some(entry) => entry,
            None => {
                let fallback = self.active_coherences.first().copied().unwrap_or(100.0);
                ScheduledTrial::regular(fallback, &mut self.rng)
            }
        };
        let target = entry
            .target
            .unwrap_or_else(|| Sign::of_with_tiebreak(entry.signed_coherence, &mut self.rng));
        let params = TrialParameters {
            seed: entry.seed,
            signed_coherence: entry.signed_coherence,
            target,
            is_correction_trial: entry.kind == EntryKind::Correction,
            is_repeat_trial: entry.repeat,
            in_active_block: entry.kind == EntryKind::ActiveCorrection,
            coherence_level: self.graduation.level,
        };
        debug!(
            target: "scheduler",
            "trial {}: coh={} target={} correction={} repeat={} active={}",
            self.counters.attempt + 1,
            params.signed_coherence,
            params.target,
            params.is_correction_trial,
            params.is_repeat_trial,
            params.in_active_block
        );
        self.current = Some(ActiveTrial {
            entry,
            params,
            evaluation: None,
        });
        params
    }

    fn start_active_block(&mut self) {
        let mean = self.bias.mean();
        let Some(bias_side) = Sign::of(mean) else {
            return;
        };
        let bc = &self.config.bias_correction;
        let len = bc.active_block_length.sample(&mut self.rng);
        let block = generate_active_block(
            len,
            bias_side.opposite(),
            bc.active_correction_strength,
            &bc.active_coherences,
            self.config.stimulus.max_repeat,
            &mut self.rng,
        );
        info!(
            target: "scheduler",
            "bias {mean:+.2}: active correction block of {len} trials toward {}",
            bias_side.opposite()
        );
        self.schedule.replace(block);
        self.bias.reset();
        self.in_active_block = true;
    }

    fn regenerate_block(&mut self) {
        if self.in_active_block {
            debug!(target: "scheduler", "active correction block finished");
            self.in_active_block = false;
        }
        let levels = &self.config.stimulus.coherence_levels;
        if self
            .graduation
            .evaluate(&self.config.graduation, levels, &self.performance)
        {
            self.active_coherences = self.coherences_for_level();
            info!(
                target: "scheduler",
                "graduated to coherence level {} ({:?})",
                self.graduation.level,
                self.active_coherences
            );
        }
        let stimulus = &self.config.stimulus;
        let canonical = self.counters.attempt == 0;
        let block = generate_block(
            &self.active_coherences,
            stimulus.repeats_per_block,
            stimulus.schedule_structure,
            stimulus.max_repeat,
            canonical,
            &mut self.rng,
        );
        debug!(
            target: "scheduler",
            "block {} generated: {} trials, canonical={canonical}",
            self.schedule.generation() + 1,
            block.len()
        );
        self.schedule.replace(block);
    }

    pub fn evaluate_outcome(
        &mut self,
        choice: Option<Sign>,
        response_time: Option<f64>,
    ) -> Result<Evaluation, SchedulerError> {
        let policy = self.noresponse_policy();
        let volume = self.reward_volume;
        let active = self.current.as_mut().ok_or(SchedulerError::NoActiveTrial)?;
        let target = active.params.target;
        let (outcome, reward) = if active.params.in_active_block {
            let reward = if choice == Some(target) { volume } else { 0.0 };
            (Outcome::Invalid, reward)
        } else {
            match choice {
                Some(c) if c == target => (Outcome::Correct, volume),
                Some(_) => (Outcome::Incorrect, 0.0),
                None => (Outcome::NoResponse, policy.volume(volume)),
            }
        };
        active.evaluation = Some(Evaluated {
            choice,
            response_time: response_time.filter(|rt| rt.is_finite()),
            outcome,
            reward,
            reward_fault: false,
        });
        Ok(Evaluation {
            outcome,
            reward_volume: reward,
        })
    }

    /// The reward write failed: the trial counts as a no-response with
    /// nothing delivered.
    pub fn reward_failed(&mut self) -> Result<Evaluation, SchedulerError> {
        let active = self.current.as_mut().ok_or(SchedulerError::NoActiveTrial)?;
        let ev = active
            .evaluation
            .as_mut()
            .ok_or(SchedulerError::NotEvaluated)?;
        if ev.outcome != Outcome::Invalid {
            ev.outcome = Outcome::NoResponse;
        }
        ev.reward = 0.0;
        ev.reward_fault = true;
        Ok(Evaluation {
            outcome: ev.outcome,
            reward_volume: 0.0,
        })
    }

    pub fn finalize_trial(&mut self, timing: TrialTiming) -> Result<TrialRecord, SchedulerError> {
        let active = self.current.as_ref().ok_or(SchedulerError::NoActiveTrial)?;
        let ev = active.evaluation.ok_or(SchedulerError::NotEvaluated)?;
        let ActiveTrial { entry, params, .. } = *active;
        self.current = None;

        let coherence = params.signed_coherence;
        let passive_threshold = self.config.bias_correction.passive_coherence_threshold;
        let mut next = NextTrialFlags::default();
        self.counters.attempt += 1;
        if params.is_correction_trial {
            self.counters.correction += 1;
        }

        let valid = match ev.outcome {
            Outcome::Invalid => {
                self.counters.invalid += 1;
                next.is_repeat_trial = ev.choice != Some(params.target);
                false
            }
            Outcome::Correct | Outcome::Incorrect => {
                let valid = !params.is_correction_trial;
                if valid {
                    self.counters.valid += 1;
                    if ev.outcome == Outcome::Correct {
                        self.counters.correct += 1;
                    } else {
                        self.counters.incorrect += 1;
                    }
                }
                next.is_correction_trial =
                    ev.outcome == Outcome::Incorrect && coherence.abs() > passive_threshold;
                valid
            }
            Outcome::NoResponse => {
                self.counters.noresponse += 1;
                next.is_repeat_trial =
                    self.config.training.training_type == TrainingType::ActiveOnly;
                false
            }
        };

        // Correction trials stay out of the accuracy statistics but still
        // show which side the subject favours.
        let responded = matches!(ev.outcome, Outcome::Correct | Outcome::Incorrect);
        if let (true, Some(choice)) = (responded, ev.choice) {
            self.bias.push(choice);
        }
        if let (true, Some(choice)) = (valid, ev.choice) {
            self.performance
                .record(coherence, ev.outcome == Outcome::Correct);
            self.plots.record(coherence, choice, ev.response_time);
            self.graduation.trials_in_level += 1;
            self.last_valid_outcome = Some(ev.outcome);
        }
        self.total_reward += ev.reward;

        if next.is_repeat_trial {
            self.schedule.push_repeat(entry, params.target);
        }
        if next.is_correction_trial {
            let correction = self.correction_entry(coherence);
            debug!(
                target: "scheduler",
                "correction trial queued: coh={} (bias {:+.2})",
                correction.signed_coherence,
                self.bias.mean()
            );
            self.schedule.push_correction(correction);
        }

        let running_accuracy = match (self.counters.percent_correct(), self.last_valid_outcome) {
            (Some(percent_correct), Some(last_outcome)) => Some(RunningAccuracy {
                valid: self.counters.valid,
                percent_correct,
                last_outcome,
            }),
            _ => None,
        };

        Ok(TrialRecord {
            attempt_index: self.counters.attempt,
            valid_index: self.counters.valid,
            correction_index: self.counters.correction,
            is_correction_trial: params.is_correction_trial,
            is_repeat_trial: params.is_repeat_trial,
            in_active_block: params.in_active_block,
            signed_coherence: coherence,
            target: params.target,
            choice: ev.choice,
            response_time: ev.response_time,
            response_onset: timing.response_onset,
            valid,
            outcome: ev.outcome,
            trial_reward: ev.reward,
            reward_volume: self.reward_volume,
            reward_fault: ev.reward_fault,
            total_reward: self.total_reward,
            coherence_level: params.coherence_level,
            fixation_restarts: timing.fixation_restarts,
            epochs: timing.epochs,
            stimulus_seed: params.seed,
            next_trial: next,
            running_accuracy,
        })
    }

    /// Side pulled against the current bias in interleaved schedules; the
    /// same coherence again in blocked ones.
    fn correction_entry(&mut self, previous: f64) -> ScheduledTrial {
        let bc = &self.config.bias_correction;
        let magnitude = previous.abs();
        let side = match self.config.stimulus.schedule_structure {
            ScheduleStructure::Blocked => {
                Sign::of_with_tiebreak(previous, &mut self.rng)
            }
            ScheduleStructure::Interleaved => {
                let centre = -bc.correction_bias_gain * self.bias.mean();
                match Normal::new(centre, bc.correction_spread) {
                    Ok(normal) => {
                        let draw: f64 = normal.sample(&mut self.rng);
                        Sign::of_with_tiebreak(draw, &mut self.rng)
                    }
                    Err(_) => Sign::of_with_tiebreak(centre, &mut self.rng),
                }
            }
        };
        ScheduledTrial::with_kind(side.as_f64() * magnitude, EntryKind::Correction, &mut self.rng)
    }

    /// Puts an unfinished trial back at the front of the schedule.
    pub fn abandon_trial(&mut self) -> bool {
        match self.current.take() {
            Some(active) => {
                let mut entry = active.entry;
                entry.target = Some(active.params.target);
                self.schedule.restore_front(entry);
                debug!(
                    target: "scheduler",
                    "trial abandoned; coh={} requeued",
                    entry.signed_coherence
                );
                true
            }
            None => false,
        }
    }

    pub fn duration_context(&self) -> DurationContext {
        let (signed_coherence, response_time) = match &self.current {
            Some(active) => (
                active.params.signed_coherence,
                active.evaluation.and_then(|e| e.response_time),
            ),
            None => (0.0, None),
        };
        DurationContext {
            response_time,
            signed_coherence,
            coherence_level: self.graduation.level,
        }
    }

    pub fn current(&self) -> Option<&TrialParameters> {
        self.current.as_ref().map(|a| &a.params)
    }

    pub fn current_outcome(&self) -> Option<Outcome> {
        self.current
            .as_ref()
            .and_then(|a| a.evaluation)
            .map(|e| e.outcome)
    }

    pub fn snapshot(&self) -> SchedulerState {
        SchedulerState {
            rolling_performance: self.performance.clone(),
            reward_volume_ul: self.reward_volume,
            graduation: self.graduation,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn reward_volume(&self) -> f64 {
        self.reward_volume
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn counters(&self) -> &TrialCounters {
        &self.counters
    }

    pub fn plots(&self) -> &PlotAggregates {
        &self.plots
    }

    pub fn performance(&self) -> &RollingPerformance {
        &self.performance
    }

    pub fn bias(&self) -> &RollingBias {
        &self.bias
    }

    pub fn schedule(&self) -> &BlockSchedule {
        &self.schedule
    }

    pub fn in_active_block(&self) -> bool {
        self.in_active_block
    }

    pub fn active_coherences(&self) -> &[f64] {
        &self.active_coherences
    }

    pub fn graduation(&self) -> &GraduationState {
        &self.graduation
    }
}
