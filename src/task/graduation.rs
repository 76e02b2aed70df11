use serde::{Deserialize, Serialize};

use crate::task::performance::RollingPerformance;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraduationMode {
    #[default]
    None,
    /// Every magnitude of the current level reaches `accuracy_threshold`.
    Accuracy,
    /// A fixed number of valid trials in the current level.
    NTrials,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraduationConfig {
    #[serde(default)]
    pub mode: GraduationMode,
    #[serde(default = "GraduationConfig::default_accuracy_threshold")]
    pub accuracy_threshold: f64,
    /// Valid trials required in a level before any criterion is checked.
    #[serde(default = "GraduationConfig::default_min_trials")]
    pub min_trials: u64,
}

impl GraduationConfig {
    fn default_accuracy_threshold() -> f64 {
        0.8
    }
    fn default_min_trials() -> u64 {
        200
    }
}

impl Default for GraduationConfig {
    fn default() -> Self {
        Self {
            mode: GraduationMode::default(),
            accuracy_threshold: Self::default_accuracy_threshold(),
            min_trials: Self::default_min_trials(),
        }
    }
}

/// Persisted progress through the configured coherence levels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraduationState {
    pub level: usize,
    pub trials_in_level: u64,
}

impl GraduationState {
    /// Checks the criterion and moves to the next level when it is met.
    /// Returns true on promotion.
    pub fn evaluate(
        &mut self,
        cfg: &GraduationConfig,
        levels: &[Vec<f64>],
        performance: &RollingPerformance,
    ) -> bool {
        if levels.is_empty() || self.level + 1 >= levels.len() {
            return false;
        }
        if self.trials_in_level < cfg.min_trials {
            return false;
        }
        let passed = match cfg.mode {
            GraduationMode::None => false,
            GraduationMode::NTrials => true,
            GraduationMode::Accuracy => levels[self.level].iter().all(|&c| {
                performance
                    .magnitude_accuracy(c)
                    .is_some_and(|acc| acc >= cfg.accuracy_threshold)
            }),
        };
        if passed {
            self.level += 1;
            self.trials_in_level = 0;
        }
        passed
    }

    pub fn clamp_to(&mut self, levels: &[Vec<f64>]) {
        if !levels.is_empty() && self.level >= levels.len() {
            self.level = levels.len() - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels() -> Vec<Vec<f64>> {
        vec![vec![100.0], vec![100.0, 72.0], vec![100.0, 72.0, 36.0]]
    }

    #[test]
    fn n_trials_promotes_after_min_trials() {
        let cfg = GraduationConfig {
            mode: GraduationMode::NTrials,
            min_trials: 10,
            ..Default::default()
        };
        let perf = RollingPerformance::new(10, &[]);
        let mut state = GraduationState {
            level: 0,
            trials_in_level: 9,
        };
        assert!(!state.evaluate(&cfg, &levels(), &perf));
        state.trials_in_level = 10;
        assert!(state.evaluate(&cfg, &levels(), &perf));
        assert_eq!(state.level, 1);
        assert_eq!(state.trials_in_level, 0);
    }

    #[test]
    fn accuracy_requires_every_magnitude() {
        let cfg = GraduationConfig {
            mode: GraduationMode::Accuracy,
            accuracy_threshold: 0.8,
            min_trials: 0,
        };
        let mut perf = RollingPerformance::new(10, &[-100.0, 100.0, -72.0, 72.0]);
        for _ in 0..10 {
            perf.record(100.0, true);
            perf.record(-72.0, false);
        }
        let mut state = GraduationState {
            level: 1,
            trials_in_level: 0,
        };
        assert!(!state.evaluate(&cfg, &levels(), &perf));
        for _ in 0..10 {
            perf.record(-72.0, true);
        }
        assert!(state.evaluate(&cfg, &levels(), &perf));
        assert_eq!(state.level, 2);
        // last level never promotes
        assert!(!state.evaluate(&cfg, &levels(), &perf));
    }

    #[test]
    fn mode_none_never_promotes() {
        let cfg = GraduationConfig {
            min_trials: 0,
            ..Default::default()
        };
        let perf = RollingPerformance::new(10, &[]);
        let mut state = GraduationState::default();
        assert!(!state.evaluate(&cfg, &levels(), &perf));
    }
}
