use crate::core::sign::Sign;

/// Circular buffer of the last N choices from valid and correction trials
/// (±1, zero when empty).
#[derive(Debug, Clone)]
pub struct RollingBias {
    choices: Vec<f64>,
    index: usize,
}

impl RollingBias {
    pub fn new(window: usize) -> Self {
        Self {
            choices: vec![0.0; window.max(1)],
            index: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.choices.len()
    }

    pub fn push(&mut self, choice: Sign) {
        self.choices[self.index] = choice.as_f64();
        self.index = (self.index + 1) % self.choices.len();
    }

    /// Mean over the whole window; positive means a rightward bias.
    pub fn mean(&self) -> f64 {
        self.choices.iter().sum::<f64>() / self.choices.len() as f64
    }

    /// Back to neutral; the next entry is written at slot zero.
    pub fn reset(&mut self) {
        self.choices.fill(0.0);
        self.index = 0;
    }

    pub fn values(&self) -> &[f64] {
        &self.choices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_tracks_last_window_only() {
        let mut bias = RollingBias::new(4);
        for _ in 0..4 {
            bias.push(Sign::Right);
        }
        assert_eq!(bias.mean(), 1.0);
        bias.push(Sign::Left);
        bias.push(Sign::Left);
        assert_eq!(bias.mean(), 0.0);
    }

    #[test]
    fn partial_window_is_diluted_by_neutral_slots() {
        let mut bias = RollingBias::new(10);
        bias.push(Sign::Left);
        bias.push(Sign::Left);
        assert!((bias.mean() + 0.2).abs() < 1e-12);
        bias.reset();
        assert_eq!(bias.mean(), 0.0);
    }
}
