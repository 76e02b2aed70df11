use serde::{Deserialize, Serialize};

/// Reward given when no response arrived in the choice window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoResponseRewardPolicy {
    None,
    Half,
    Full,
}

impl NoResponseRewardPolicy {
    pub fn volume(self, full_volume: f64) -> f64 {
        match self {
            NoResponseRewardPolicy::None => 0.0,
            NoResponseRewardPolicy::Half => full_volume * 0.5,
            NoResponseRewardPolicy::Full => full_volume,
        }
    }
}

/// Slow session-to-session adjustment of the reward per correct trial.
///
/// Each threshold that the subject's state falls on the "needs more" side of
/// contributes one `step_ul`; the summed change is limited to
/// `±max_change_ul` before the result is clamped to the volume bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomeostasisConfig {
    #[serde(default = "HomeostasisConfig::default_step_ul")]
    pub step_ul: f64,
    /// Weight (% of baseline) below each of these adds a step.
    #[serde(default = "HomeostasisConfig::default_weight_thresholds_pct")]
    pub weight_thresholds_pct: Vec<f64>,
    /// Previous session intake (µL) below each of these adds a step.
    #[serde(default = "HomeostasisConfig::default_intake_thresholds_ul")]
    pub intake_thresholds_ul: Vec<f64>,
    /// Previous session attempts above this removes a step.
    #[serde(default = "HomeostasisConfig::default_attempt_ceiling")]
    pub attempt_ceiling: u64,
    #[serde(default = "HomeostasisConfig::default_max_change_ul")]
    pub max_change_ul: f64,
}

impl HomeostasisConfig {
    fn default_step_ul() -> f64 {
        0.1
    }
    fn default_weight_thresholds_pct() -> Vec<f64> {
        vec![80.0]
    }
    fn default_intake_thresholds_ul() -> Vec<f64> {
        vec![700.0, 500.0]
    }
    fn default_attempt_ceiling() -> u64 {
        200
    }
    fn default_max_change_ul() -> f64 {
        0.2
    }
}

impl Default for HomeostasisConfig {
    fn default() -> Self {
        Self {
            step_ul: Self::default_step_ul(),
            weight_thresholds_pct: Self::default_weight_thresholds_pct(),
            intake_thresholds_ul: Self::default_intake_thresholds_ul(),
            attempt_ceiling: Self::default_attempt_ceiling(),
            max_change_ul: Self::default_max_change_ul(),
        }
    }
}

/// What the previous session left behind plus today's weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomeostasisInputs {
    pub previous_volume_ul: f64,
    pub weight_pct: f64,
    pub previous_total_reward_ul: f64,
    pub previous_attempts: u64,
}

/// Pure function of its inputs; calling it twice gives the same volume.
pub fn homeostatic_volume(
    cfg: &HomeostasisConfig,
    inputs: &HomeostasisInputs,
    min_ul: f64,
    max_ul: f64,
) -> f64 {
    let mut change = 0.0;
    if inputs.weight_pct.is_finite() {
        change += cfg
            .weight_thresholds_pct
            .iter()
            .filter(|&&t| inputs.weight_pct < t)
            .count() as f64
            * cfg.step_ul;
    }
    if inputs.previous_total_reward_ul.is_finite() {
        change += cfg
            .intake_thresholds_ul
            .iter()
            .filter(|&&t| inputs.previous_total_reward_ul < t)
            .count() as f64
            * cfg.step_ul;
    }
    if inputs.previous_attempts > cfg.attempt_ceiling {
        change -= cfg.step_ul;
    }
    let limit = cfg.max_change_ul.abs();
    let change = change.clamp(-limit, limit);

    let base = if inputs.previous_volume_ul.is_finite() {
        inputs.previous_volume_ul
    } else {
        min_ul
    };
    (base + change).clamp(min_ul, max_ul)
}
