use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::duration::{DurationRule, OutcomeDurations};
use crate::stimulus::dots::DotConfig;
use crate::stimulus::{EpochKind, EpochTable, Rgb};
use crate::task::block::{BlockLengthDistribution, ScheduleStructure};
use crate::task::graduation::GraduationConfig;
use crate::task::performance::CoherenceKey;
use crate::task::reward::{HomeostasisConfig, NoResponseRewardPolicy};
use crate::task::scheduler::{Outcome, TrainingType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    #[serde(default = "SubjectConfig::default_name")]
    pub name: String,
    #[serde(default = "SubjectConfig::default_weight_g")]
    pub baseline_weight_g: f64,
    #[serde(default = "SubjectConfig::default_weight_g")]
    pub start_weight_g: f64,
    #[serde(default = "SubjectConfig::default_session_day")]
    pub session_day: u32,
}

impl SubjectConfig {
    fn default_name() -> String {
        "subject".to_string()
    }
    fn default_weight_g() -> f64 {
        25.0
    }
    fn default_session_day() -> u32 {
        1
    }

    /// Start weight as a percentage of baseline; NaN when no baseline is set.
    pub fn weight_pct(&self) -> f64 {
        if self.baseline_weight_g > 0.0 {
            self.start_weight_g / self.baseline_weight_g * 100.0
        } else {
            f64::NAN
        }
    }
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            baseline_weight_g: Self::default_weight_g(),
            start_weight_g: Self::default_weight_g(),
            session_day: Self::default_session_day(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusConfig {
    /// Coherence magnitudes in use by the protocol.
    #[serde(default = "StimulusConfig::default_coherences")]
    pub coherences: Vec<f64>,
    /// Signed coherences drawn into regular blocks.
    #[serde(default = "StimulusConfig::default_signed_coherences")]
    pub signed_coherences: Vec<f64>,
    /// Trials per magnitude per block, split across both signs.
    #[serde(default = "StimulusConfig::default_repeats_per_block")]
    pub repeats_per_block: usize,
    #[serde(default)]
    pub schedule_structure: ScheduleStructure,
    #[serde(default = "StimulusConfig::default_max_repeat")]
    pub max_repeat: usize,
    /// Nested magnitude sets for graduation; empty disables levels.
    #[serde(default)]
    pub coherence_levels: Vec<Vec<f64>>,
}

impl StimulusConfig {
    fn default_coherences() -> Vec<f64> {
        vec![100.0, 72.0, 36.0, 18.0, 9.0, 0.0]
    }
    fn default_signed_coherences() -> Vec<f64> {
        vec![
            -100.0, -72.0, -36.0, -18.0, -9.0, 0.0, 9.0, 18.0, 36.0, 72.0, 100.0,
        ]
    }
    fn default_repeats_per_block() -> usize {
        6
    }
    fn default_max_repeat() -> usize {
        3
    }
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            coherences: Self::default_coherences(),
            signed_coherences: Self::default_signed_coherences(),
            repeats_per_block: Self::default_repeats_per_block(),
            schedule_structure: ScheduleStructure::default(),
            max_repeat: Self::default_max_repeat(),
            coherence_levels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainingConfig {
    #[serde(default)]
    pub training_type: TrainingType,
    /// Falls back to the training type's default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noresponse_reward_policy: Option<NoResponseRewardPolicy>,
    /// Wait in the must-respond epoch until a delivered reward is consumed.
    #[serde(default)]
    pub must_consume_reward: bool,
}

impl TrainingConfig {
    pub fn noresponse_policy(&self) -> NoResponseRewardPolicy {
        self.noresponse_reward_policy
            .unwrap_or_else(|| self.training_type.default_noresponse_policy())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasCorrectionConfig {
    #[serde(default = "BiasCorrectionConfig::default_bias_window")]
    pub bias_window: usize,
    /// Incorrect trials above this |coherence| queue a correction trial.
    #[serde(default = "BiasCorrectionConfig::default_passive_coherence_threshold")]
    pub passive_coherence_threshold: f64,
    /// |rolling bias| at or above this starts an active correction block.
    #[serde(default = "BiasCorrectionConfig::default_active_abs_bias_threshold")]
    pub active_abs_bias_threshold: f64,
    /// Fraction of active-block trials toward the correction side.
    #[serde(default = "BiasCorrectionConfig::default_active_correction_strength")]
    pub active_correction_strength: f64,
    #[serde(default = "BiasCorrectionConfig::default_active_coherences")]
    pub active_coherences: Vec<f64>,
    #[serde(default)]
    pub active_block_length: BlockLengthDistribution,
    /// Correction side ~ Normal(-gain * bias, spread).
    #[serde(default = "BiasCorrectionConfig::default_correction_bias_gain")]
    pub correction_bias_gain: f64,
    #[serde(default = "BiasCorrectionConfig::default_correction_spread")]
    pub correction_spread: f64,
}

impl BiasCorrectionConfig {
    fn default_bias_window() -> usize {
        20
    }
    fn default_passive_coherence_threshold() -> f64 {
        40.0
    }
    fn default_active_abs_bias_threshold() -> f64 {
        0.7
    }
    fn default_active_correction_strength() -> f64 {
        0.7
    }
    fn default_active_coherences() -> Vec<f64> {
        vec![100.0, 72.0]
    }
    fn default_correction_bias_gain() -> f64 {
        2.0
    }
    fn default_correction_spread() -> f64 {
        0.4
    }
}

impl Default for BiasCorrectionConfig {
    fn default() -> Self {
        Self {
            bias_window: Self::default_bias_window(),
            passive_coherence_threshold: Self::default_passive_coherence_threshold(),
            active_abs_bias_threshold: Self::default_active_abs_bias_threshold(),
            active_correction_strength: Self::default_active_correction_strength(),
            active_coherences: Self::default_active_coherences(),
            active_block_length: BlockLengthDistribution::default(),
            correction_bias_gain: Self::default_correction_bias_gain(),
            correction_spread: Self::default_correction_spread(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingPerformanceConfig {
    #[serde(default = "RollingPerformanceConfig::default_window")]
    pub window: usize,
}

impl RollingPerformanceConfig {
    fn default_window() -> usize {
        50
    }
}

impl Default for RollingPerformanceConfig {
    fn default() -> Self {
        Self {
            window: Self::default_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "RewardConfig::default_initial_volume_ul")]
    pub initial_volume_ul: f64,
    #[serde(default = "RewardConfig::default_min_volume_ul")]
    pub min_volume_ul: f64,
    #[serde(default = "RewardConfig::default_max_volume_ul")]
    pub max_volume_ul: f64,
    #[serde(default)]
    pub homeostasis: HomeostasisConfig,
}

impl RewardConfig {
    fn default_initial_volume_ul() -> f64 {
        2.0
    }
    fn default_min_volume_ul() -> f64 {
        1.5
    }
    fn default_max_volume_ul() -> f64 {
        3.5
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            initial_volume_ul: Self::default_initial_volume_ul(),
            min_volume_ul: Self::default_min_volume_ul(),
            max_volume_ul: Self::default_max_volume_ul(),
            homeostasis: HomeostasisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixationConfig {
    #[serde(default = "FixationConfig::default_duration")]
    pub duration: DurationRule,
    /// A response while fixating starts the hold over.
    #[serde(default = "FixationConfig::default_restart_on_response")]
    pub restart_on_response: bool,
}

impl FixationConfig {
    fn default_duration() -> DurationRule {
        DurationRule::fixed(0.5)
    }
    fn default_restart_on_response() -> bool {
        true
    }
}

impl Default for FixationConfig {
    fn default() -> Self {
        Self {
            duration: Self::default_duration(),
            restart_on_response: Self::default_restart_on_response(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusWindowConfig {
    /// Seconds from onset before responses count.
    #[serde(default)]
    pub min_viewing: f64,
    #[serde(default = "StimulusWindowConfig::default_max_viewing")]
    pub max_viewing: f64,
    /// Stimulus duration when responses are not accepted.
    #[serde(default = "StimulusWindowConfig::default_passive_viewing")]
    pub passive_viewing: DurationRule,
}

impl StimulusWindowConfig {
    fn default_max_viewing() -> f64 {
        3.0
    }
    fn default_passive_viewing() -> DurationRule {
        DurationRule::fixed(3.0)
    }
}

impl Default for StimulusWindowConfig {
    fn default() -> Self {
        Self {
            min_viewing: 0.0,
            max_viewing: Self::default_max_viewing(),
            passive_viewing: Self::default_passive_viewing(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforcementConfig {
    #[serde(default = "ReinforcementConfig::default_durations")]
    pub durations: OutcomeDurations,
    /// Seconds the target-side indicator stays lit; zero disables it.
    #[serde(default = "ReinforcementConfig::default_knowledge_of_results")]
    pub knowledge_of_results: f64,
}

impl ReinforcementConfig {
    fn default_durations() -> OutcomeDurations {
        OutcomeDurations {
            correct: DurationRule::fixed(0.5),
            incorrect: DurationRule::fixed(1.0),
            noresponse: DurationRule::fixed(0.5),
            invalid: DurationRule::fixed(0.5),
        }
    }
    fn default_knowledge_of_results() -> f64 {
        0.5
    }
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            durations: Self::default_durations(),
            knowledge_of_results: Self::default_knowledge_of_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MustRespondConfig {
    /// Give up waiting after this many seconds; unset waits until stopped.
    #[serde(default = "MustRespondConfig::default_timeout", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl MustRespondConfig {
    fn default_timeout() -> Option<f64> {
        Some(10.0)
    }
}

impl Default for MustRespondConfig {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochsConfig {
    #[serde(default = "EpochsConfig::default_order")]
    pub order: Vec<EpochKind>,
    #[serde(default)]
    pub fixation: FixationConfig,
    #[serde(default)]
    pub stimulus: StimulusWindowConfig,
    #[serde(default)]
    pub reinforcement: ReinforcementConfig,
    #[serde(default)]
    pub delay: OutcomeDurations,
    #[serde(default)]
    pub must_respond: MustRespondConfig,
    #[serde(default = "EpochsConfig::default_intertrial")]
    pub intertrial: OutcomeDurations,
}

impl EpochsConfig {
    fn default_order() -> Vec<EpochKind> {
        vec![
            EpochKind::Fixation,
            EpochKind::Stimulus,
            EpochKind::Reinforcement,
            EpochKind::Intertrial,
        ]
    }
    fn default_intertrial() -> OutcomeDurations {
        OutcomeDurations {
            correct: DurationRule::Exponential {
                loc: 0.75,
                scale: 0.2,
            },
            incorrect: DurationRule::ResponseTimeDecay {
                base: 3.0,
                amplitude: 4.0,
                rate: 3.0,
            },
            noresponse: DurationRule::fixed(3.0),
            invalid: DurationRule::fixed(2.0),
        }
    }

    pub fn contains(&self, epoch: EpochKind) -> bool {
        self.order.contains(&epoch)
    }
}

impl Default for EpochsConfig {
    fn default() -> Self {
        Self {
            order: Self::default_order(),
            fixation: FixationConfig::default(),
            stimulus: StimulusWindowConfig::default(),
            reinforcement: ReinforcementConfig::default(),
            delay: OutcomeDurations::default(),
            must_respond: MustRespondConfig::default(),
            intertrial: Self::default_intertrial(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "DisplayConfig::default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default = "DisplayConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "DisplayConfig::default_width")]
    pub width: u32,
    #[serde(default = "DisplayConfig::default_height")]
    pub height: u32,
    #[serde(default = "DisplayConfig::default_background")]
    pub background: Rgb,
    #[serde(default = "DisplayConfig::default_correct_color")]
    pub correct_color: Rgb,
    #[serde(default = "DisplayConfig::default_incorrect_color")]
    pub incorrect_color: Rgb,
    #[serde(default = "DisplayConfig::default_background")]
    pub noresponse_color: Rgb,
    #[serde(default = "DisplayConfig::default_background")]
    pub invalid_color: Rgb,
    #[serde(default)]
    pub dots: DotConfig,
    #[serde(default)]
    pub epochs: EpochTable,
}

impl DisplayConfig {
    fn default_frame_rate() -> f64 {
        60.0
    }
    fn default_queue_capacity() -> usize {
        100
    }
    fn default_width() -> u32 {
        1280
    }
    fn default_height() -> u32 {
        720
    }
    fn default_background() -> Rgb {
        [0, 0, 0]
    }
    fn default_correct_color() -> Rgb {
        [0, 96, 0]
    }
    fn default_incorrect_color() -> Rgb {
        [255, 255, 255]
    }

    pub fn outcome_color(&self, outcome: Option<Outcome>) -> Rgb {
        match outcome {
            Some(Outcome::Correct) => self.correct_color,
            Some(Outcome::Incorrect) => self.incorrect_color,
            Some(Outcome::NoResponse) => self.noresponse_color,
            Some(Outcome::Invalid) => self.invalid_color,
            None => self.background,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            frame_rate: Self::default_frame_rate(),
            queue_capacity: Self::default_queue_capacity(),
            width: Self::default_width(),
            height: Self::default_height(),
            background: Self::default_background(),
            correct_color: Self::default_correct_color(),
            incorrect_color: Self::default_incorrect_color(),
            noresponse_color: Self::default_background(),
            invalid_color: Self::default_background(),
            dots: DotConfig::default(),
            epochs: EpochTable::standard(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between hardware reads when nothing is pending.
    #[serde(default = "MonitorConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Recent events kept for inspection.
    #[serde(default = "MonitorConfig::default_recent_capacity")]
    pub recent_capacity: usize,
    /// Granularity at which a waiting sequencer checks the stop flag.
    #[serde(default = "MonitorConfig::default_wait_slice_ms")]
    pub wait_slice_ms: u64,
}

impl MonitorConfig {
    fn default_poll_interval_ms() -> u64 {
        1
    }
    fn default_recent_capacity() -> usize {
        256
    }
    fn default_wait_slice_ms() -> u64 {
        10
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            recent_capacity: Self::default_recent_capacity(),
            wait_slice_ms: Self::default_wait_slice_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trials: Option<u64>,
    #[serde(default = "RunConfig::default_data_dir")]
    pub data_dir: String,
}

impl RunConfig {
    fn default_data_dir() -> String {
        "data".to_string()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            max_trials: None,
            data_dir: Self::default_data_dir(),
        }
    }
}

/// Whole-session configuration, built once and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub subject: SubjectConfig,
    #[serde(default)]
    pub stimulus: StimulusConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub bias_correction: BiasCorrectionConfig,
    #[serde(default)]
    pub rolling_performance: RollingPerformanceConfig,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub epochs: EpochsConfig,
    #[serde(default)]
    pub graduation: GraduationConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub session: RunConfig,
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<string>".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: shown,
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path`, or write a fully commented default file there and return
    /// the defaults when it does not exist yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let default_cfg = Self::default();
        match toml::to_string_pretty(&default_cfg) {
            Ok(text) => {
                let mut commented = String::new();
                for line in text.lines() {
                    if line.trim().is_empty() {
                        commented.push('\n');
                    } else {
                        commented.push_str("# ");
                        commented.push_str(line);
                        commented.push('\n');
                    }
                }
                if let Err(err) = fs::write(path, commented) {
                    tracing::warn!("failed to write default config to {}: {err}", path.display());
                }
            }
            Err(err) => tracing::warn!("failed to serialize default config: {err}"),
        }
        Ok(default_cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_stimulus()?;
        self.validate_bias_and_reward()?;
        self.validate_epochs()?;
        self.validate_display()
    }

    fn validate_stimulus(&self) -> Result<(), ConfigError> {
        let s = &self.stimulus;
        if s.coherences.is_empty() {
            return Err(invalid("stimulus.coherences is empty"));
        }
        if s.signed_coherences.is_empty() {
            return Err(invalid("stimulus.signed_coherences is empty"));
        }
        if s.repeats_per_block == 0 {
            return Err(invalid("stimulus.repeats_per_block must be > 0"));
        }
        if s.max_repeat == 0 {
            return Err(invalid("stimulus.max_repeat must be > 0"));
        }
        let all_finite = s
            .coherences
            .iter()
            .chain(&s.signed_coherences)
            .all(|c| c.is_finite() && c.abs() <= 100.0);
        if !all_finite {
            return Err(invalid("coherences must be finite and within [-100, 100]"));
        }
        let magnitudes: BTreeSet<CoherenceKey> =
            s.coherences.iter().map(|&c| CoherenceKey::magnitude(c)).collect();
        if let Some(c) = s
            .signed_coherences
            .iter()
            .find(|&&c| !magnitudes.contains(&CoherenceKey::magnitude(c)))
        {
            return Err(invalid(format!(
                "signed coherence {c} has no magnitude in stimulus.coherences"
            )));
        }
        for (i, level) in s.coherence_levels.iter().enumerate() {
            if level.is_empty() {
                return Err(invalid(format!("coherence level {i} is empty")));
            }
            let reachable = s.signed_coherences.iter().any(|&c| {
                level
                    .iter()
                    .any(|&m| CoherenceKey::magnitude(m) == CoherenceKey::magnitude(c))
            });
            if !reachable {
                return Err(invalid(format!(
                    "coherence level {i} shares no magnitude with signed_coherences"
                )));
            }
        }
        Ok(())
    }

    fn validate_bias_and_reward(&self) -> Result<(), ConfigError> {
        let b = &self.bias_correction;
        if b.bias_window == 0 {
            return Err(invalid("bias_correction.bias_window must be > 0"));
        }
        if self.rolling_performance.window == 0 {
            return Err(invalid("rolling_performance.window must be > 0"));
        }
        if !b.passive_coherence_threshold.is_finite() || !b.active_abs_bias_threshold.is_finite() {
            return Err(invalid("bias thresholds must be finite"));
        }
        if !(0.0..=1.0).contains(&b.active_correction_strength) {
            return Err(invalid("active_correction_strength must be within [0, 1]"));
        }
        if b.active_coherences.is_empty()
            || b
                .active_coherences
                .iter()
                .any(|c| !c.is_finite() || *c == 0.0 || c.abs() > 100.0)
        {
            return Err(invalid(
                "active_coherences must be non-empty, non-zero and within 100",
            ));
        }
        b.active_block_length
            .validate()
            .map_err(|e| invalid(format!("active_block_length: {e}")))?;
        if !(b.correction_spread.is_finite() && b.correction_spread > 0.0)
            || !b.correction_bias_gain.is_finite()
        {
            return Err(invalid("correction_spread must be > 0 and gain finite"));
        }

        let r = &self.reward;
        let bounds_ok = r.min_volume_ul.is_finite()
            && r.max_volume_ul.is_finite()
            && r.min_volume_ul >= 0.0
            && r.min_volume_ul <= r.max_volume_ul;
        if !bounds_ok {
            return Err(invalid(format!(
                "reward bounds [{}, {}] are invalid",
                r.min_volume_ul, r.max_volume_ul
            )));
        }
        if !r.initial_volume_ul.is_finite() {
            return Err(invalid("reward.initial_volume_ul must be finite"));
        }
        Ok(())
    }

    fn validate_epochs(&self) -> Result<(), ConfigError> {
        let e = &self.epochs;
        let order = &e.order;
        let mut seen = BTreeSet::new();
        for epoch in order {
            if !seen.insert(*epoch) {
                return Err(invalid(format!("epoch {epoch} appears twice in epochs.order")));
            }
            if self.display.epochs.get(*epoch).is_none() {
                return Err(invalid(format!(
                    "epoch {epoch} has no entry in display.epochs"
                )));
            }
        }
        if order.first() != Some(&EpochKind::Fixation) {
            return Err(invalid("epochs.order must start with fixation"));
        }
        if order.last() != Some(&EpochKind::Intertrial) {
            return Err(invalid("epochs.order must end with intertrial"));
        }
        let pos = |k: EpochKind| order.iter().position(|&x| x == k);
        let (Some(stim), Some(reinf)) = (pos(EpochKind::Stimulus), pos(EpochKind::Reinforcement))
        else {
            return Err(invalid("epochs.order needs stimulus and reinforcement"));
        };
        if stim > reinf {
            return Err(invalid("stimulus must come before reinforcement"));
        }
        for late in [EpochKind::Delay, EpochKind::MustRespond] {
            if pos(late).is_some_and(|p| p < reinf) {
                return Err(invalid(format!("{late} must come after reinforcement")));
            }
        }
        if self.training.must_consume_reward && !e.contains(EpochKind::MustRespond) {
            return Err(invalid(
                "training.must_consume_reward needs must_respond in epochs.order",
            ));
        }

        e.fixation
            .duration
            .validate()
            .map_err(|m| invalid(format!("epochs.fixation: {m}")))?;
        e.stimulus
            .passive_viewing
            .validate()
            .map_err(|m| invalid(format!("epochs.stimulus.passive_viewing: {m}")))?;
        let w = &e.stimulus;
        if !(w.max_viewing.is_finite() && w.max_viewing > 0.0)
            || !(w.min_viewing.is_finite() && w.min_viewing >= 0.0)
            || w.min_viewing > w.max_viewing
        {
            return Err(invalid("stimulus viewing window needs 0 <= min_viewing <= max_viewing"));
        }
        for (name, rules) in [
            ("reinforcement", &e.reinforcement.durations),
            ("delay", &e.delay),
            ("intertrial", &e.intertrial),
        ] {
            rules
                .validate()
                .map_err(|m| invalid(format!("epochs.{name}.{m}")))?;
        }
        let kor = e.reinforcement.knowledge_of_results;
        if !(kor.is_finite() && kor >= 0.0) {
            return Err(invalid("knowledge_of_results must be >= 0"));
        }
        if e
            .must_respond
            .timeout
            .is_some_and(|t| !(t.is_finite() && t > 0.0))
        {
            return Err(invalid("must_respond.timeout must be > 0"));
        }
        Ok(())
    }

    fn validate_display(&self) -> Result<(), ConfigError> {
        let d = &self.display;
        if !(d.frame_rate.is_finite() && d.frame_rate > 0.0) {
            return Err(invalid("display.frame_rate must be > 0"));
        }
        if d.queue_capacity == 0 {
            return Err(invalid("display.queue_capacity must be > 0"));
        }
        if d.width == 0 || d.height == 0 {
            return Err(invalid("display size must be non-zero"));
        }
        d.dots
            .validate()
            .map_err(|m| invalid(format!("display.dots: {m}")))?;
        if self.monitor.poll_interval_ms == 0 || self.monitor.wait_slice_ms == 0 {
            return Err(invalid("monitor intervals must be > 0 ms"));
        }
        Ok(())
    }
}
