use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::sign::Sign;
use crate::task::scheduler::Outcome;

/// Coherence as an ordered map key (milli-percent resolution).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoherenceKey(i64);

impl CoherenceKey {
    pub fn new(coherence: f64) -> Self {
        Self((coherence * 1000.0).round() as i64)
    }

    pub fn magnitude(coherence: f64) -> Self {
        Self::new(coherence.abs())
    }

    pub fn value(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Serialize for CoherenceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}", self.value()))
    }
}

/// Session counters; reset only when a new scheduler is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCounters {
    pub attempt: u64,
    pub valid: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub noresponse: u64,
    pub invalid: u64,
    pub correction: u64,
}

impl TrialCounters {
    pub fn percent_correct(&self) -> Option<f64> {
        if self.valid == 0 {
            None
        } else {
            Some(self.correct as f64 / self.valid as f64 * 100.0)
        }
    }
}

/// `(valid trials, % correct, last valid outcome)` shown after each trial.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningAccuracy {
    pub valid: u64,
    pub percent_correct: f64,
    pub last_outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoherenceHistory {
    pub coherence: f64,
    /// 1 = correct, 0 = incorrect; oldest first.
    pub history: VecDeque<u8>,
    pub trials: u64,
}

impl CoherenceHistory {
    fn accuracy(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let hits: u64 = self.history.iter().map(|&h| h as u64).sum();
        Some(hits as f64 / self.history.len() as f64)
    }
}

/// Per-signed-coherence outcome history carried from session to session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollingPerformance {
    window: usize,
    entries: Vec<CoherenceHistory>,
}

impl RollingPerformance {
    pub fn new(window: usize, signed_coherences: &[f64]) -> Self {
        let mut perf = Self {
            window: window.max(1),
            entries: Vec::new(),
        };
        for &c in signed_coherences {
            perf.entry_mut(c);
        }
        perf
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Apply a new window length, dropping the oldest outcomes if it shrank,
    /// and make sure every configured coherence has a history.
    pub fn reconcile(&mut self, window: usize, signed_coherences: &[f64]) {
        self.window = window.max(1);
        for entry in &mut self.entries {
            while entry.history.len() > self.window {
                entry.history.pop_front();
            }
        }
        for &c in signed_coherences {
            self.entry_mut(c);
        }
    }

    fn entry_mut(&mut self, coherence: f64) -> &mut CoherenceHistory {
        let key = CoherenceKey::new(coherence);
        let pos = match self
            .entries
            .iter()
            .position(|e| CoherenceKey::new(e.coherence) == key)
        {
            Some(pos) => pos,
            None => {
                self.entries.push(CoherenceHistory {
                    coherence,
                    history: VecDeque::with_capacity(self.window),
                    trials: 0,
                });
                self.entries
                    .sort_by_key(|e| CoherenceKey::new(e.coherence));
                self.entries
                    .iter()
                    .position(|e| CoherenceKey::new(e.coherence) == key)
                    .unwrap_or(0)
            }
        };
        &mut self.entries[pos]
    }

    pub fn record(&mut self, coherence: f64, correct: bool) {
        let window = self.window;
        let entry = self.entry_mut(coherence);
        if entry.history.len() == window {
            entry.history.pop_front();
        }
        entry.history.push_back(u8::from(correct));
        entry.trials += 1;
    }

    pub fn accuracy(&self, coherence: f64) -> Option<f64> {
        let key = CoherenceKey::new(coherence);
        self.entries
            .iter()
            .find(|e| CoherenceKey::new(e.coherence) == key)
            .and_then(CoherenceHistory::accuracy)
    }

    /// Accuracy pooled over both signs of `|coherence|`.
    pub fn magnitude_accuracy(&self, coherence: f64) -> Option<f64> {
        let key = CoherenceKey::magnitude(coherence);
        let (hits, n) = self
            .entries
            .iter()
            .filter(|e| CoherenceKey::magnitude(e.coherence) == key)
            .flat_map(|e| e.history.iter())
            .fold((0u64, 0u64), |(h, n), &x| (h + x as u64, n + 1));
        if n == 0 {
            None
        } else {
            Some(hits as f64 / n as f64)
        }
    }

    pub fn entries(&self) -> &[CoherenceHistory] {
        &self.entries
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CoherenceAggregate {
    pub chose_left: u64,
    pub chose_right: u64,
    pub trial_distribution: u64,
    pub psychometric: f64,
    /// Running mean over trials with a measured response time.
    pub response_time: Option<f64>,
    #[serde(skip)]
    rt_samples: u64,
}

/// Psychometric and chronometric summaries over valid trials of this session.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PlotAggregates {
    by_coherence: BTreeMap<CoherenceKey, CoherenceAggregate>,
}

impl PlotAggregates {
    pub fn new(signed_coherences: &[f64]) -> Self {
        let by_coherence = signed_coherences
            .iter()
            .map(|&c| (CoherenceKey::new(c), CoherenceAggregate::default()))
            .collect();
        Self { by_coherence }
    }

    pub fn record(&mut self, coherence: f64, choice: Sign, response_time: Option<f64>) {
        let agg = self
            .by_coherence
            .entry(CoherenceKey::new(coherence))
            .or_default();
        match choice {
            Sign::Left => agg.chose_left += 1,
            Sign::Right => agg.chose_right += 1,
        }
        agg.trial_distribution += 1;
        agg.psychometric =
            agg.chose_right as f64 / (agg.chose_left + agg.chose_right) as f64;
        if let Some(rt) = response_time.filter(|rt| rt.is_finite()) {
            agg.rt_samples += 1;
            let n = agg.rt_samples as f64;
            agg.response_time = Some(match agg.response_time {
                Some(mean) => mean + (rt - mean) / n,
                None => rt,
            });
        }
    }

    pub fn get(&self, coherence: f64) -> Option<&CoherenceAggregate> {
        self.by_coherence.get(&CoherenceKey::new(coherence))
    }

    pub fn psychometric(&self, coherence: f64) -> Option<f64> {
        self.get(coherence)
            .filter(|a| a.trial_distribution > 0)
            .map(|a| a.psychometric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &CoherenceAggregate)> {
        self.by_coherence.iter().map(|(k, v)| (k.value(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coherence_key_orders_and_roundtrips() {
        assert!(CoherenceKey::new(-72.0) < CoherenceKey::new(9.0));
        assert_eq!(CoherenceKey::new(36.0).value(), 36.0);
        assert_eq!(CoherenceKey::magnitude(-18.0), CoherenceKey::new(18.0));
    }

    #[test]
    fn rolling_history_is_bounded_by_window() {
        let mut perf = RollingPerformance::new(3, &[-100.0, 100.0]);
        for correct in [false, false, true, true, true] {
            perf.record(100.0, correct);
        }
        assert_eq!(perf.accuracy(100.0), Some(1.0));
        assert_eq!(perf.accuracy(-100.0), None);
        perf.record(-100.0, false);
        assert_eq!(perf.magnitude_accuracy(100.0), Some(0.75));
    }

    #[test]
    fn reconcile_shrinks_history() {
        let mut perf = RollingPerformance::new(5, &[72.0]);
        for _ in 0..5 {
            perf.record(72.0, true);
        }
        perf.record(72.0, false);
        perf.reconcile(2, &[72.0, -72.0]);
        assert_eq!(perf.accuracy(72.0), Some(0.5));
        assert_eq!(perf.entries().len(), 2);
    }

    #[test]
    fn response_time_is_running_mean() {
        let mut plots = PlotAggregates::new(&[36.0]);
        plots.record(36.0, Sign::Right, Some(0.4));
        plots.record(36.0, Sign::Right, Some(0.8));
        plots.record(36.0, Sign::Left, None);
        let agg = plots.get(36.0).unwrap();
        assert!((agg.response_time.unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(agg.trial_distribution, 3);
        assert!((agg.psychometric - 2.0 / 3.0).abs() < 1e-12);
    }
}
