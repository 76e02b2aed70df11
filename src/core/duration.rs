use rand::Rng;
use rand_distr::{Distribution, Exp1, Gamma};
use serde::{Deserialize, Serialize};

use crate::task::scheduler::Outcome;

/// Inputs a duration rule may depend on.
#[derive(Clone, Copy, Debug, Default)]
pub struct DurationContext {
    pub response_time: Option<f64>,
    pub signed_coherence: f64,
    pub coherence_level: usize,
}

/// Epoch duration as data instead of code.
///
/// Durations are in seconds. Sampling never fails: invalid parameters are
/// rejected by `validate` at config load, and any non-finite or negative
/// result is clamped to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DurationRule {
    Fixed {
        value: f64,
    },
    Uniform {
        low: f64,
        high: f64,
    },
    /// `loc + scale * Exp(1)`.
    Exponential {
        loc: f64,
        scale: f64,
    },
    /// `loc + Gamma(shape, scale)`.
    Gamma {
        shape: f64,
        scale: f64,
        #[serde(default)]
        loc: f64,
    },
    /// `base + amplitude * exp(-rate * response_time)`; a missing response
    /// time is treated as zero.
    ResponseTimeDecay {
        base: f64,
        amplitude: f64,
        rate: f64,
    },
    /// `intercept + slope * response_time`.
    ResponseTimeLinear {
        intercept: f64,
        slope: f64,
    },
    /// Indexed by the current coherence level; the last entry repeats.
    PerCoherenceLevel {
        values: Vec<f64>,
    },
}

impl Default for DurationRule {
    fn default() -> Self {
        DurationRule::Fixed { value: 0.0 }
    }
}

impl DurationRule {
    pub fn fixed(value: f64) -> Self {
        DurationRule::Fixed { value }
    }

    pub fn validate(&self) -> Result<(), String> {
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be finite"))
            }
        };
        match self {
            DurationRule::Fixed { value } => finite("value", *value),
            DurationRule::Uniform { low, high } => {
                finite("low", *low)?;
                finite("high", *high)?;
                if high < low {
                    return Err(format!("uniform high {high} < low {low}"));
                }
                Ok(())
            }
            DurationRule::Exponential { loc, scale } => {
                finite("loc", *loc)?;
                if !(scale.is_finite() && *scale > 0.0) {
                    return Err(format!("exponential scale must be > 0, got {scale}"));
                }
                Ok(())
            }
            DurationRule::Gamma { shape, scale, loc } => {
                finite("loc", *loc)?;
                if !(shape.is_finite() && *shape > 0.0 && scale.is_finite() && *scale > 0.0) {
                    return Err(format!("gamma shape/scale must be > 0, got {shape}/{scale}"));
                }
                Ok(())
            }
            DurationRule::ResponseTimeDecay {
                base,
                amplitude,
                rate,
            } => {
                finite("base", *base)?;
                finite("amplitude", *amplitude)?;
                finite("rate", *rate)
            }
            DurationRule::ResponseTimeLinear { intercept, slope } => {
                finite("intercept", *intercept)?;
                finite("slope", *slope)
            }
            DurationRule::PerCoherenceLevel { values } => {
                if values.is_empty() {
                    return Err("per_coherence_level needs at least one value".to_string());
                }
                values.iter().try_for_each(|v| finite("values", *v))
            }
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, ctx: &DurationContext, rng: &mut R) -> f64 {
        let rt = ctx
            .response_time
            .filter(|rt| rt.is_finite())
            .unwrap_or(0.0);
        let raw = match self {
            DurationRule::Fixed { value } => *value,
            DurationRule::Uniform { low, high } => {
                if high > low {
                    rng.random_range(*low..*high)
                } else {
                    *low
                }
            }
            DurationRule::Exponential { loc, scale } => {
                let e: f64 = Exp1.sample(rng);
                loc + scale * e
            }
            DurationRule::Gamma { shape, scale, loc } => match Gamma::new(*shape, *scale) {
                Ok(g) => loc + g.sample(rng),
                Err(_) => *loc,
            },
            DurationRule::ResponseTimeDecay {
                base,
                amplitude,
                rate,
            } => base + amplitude * (-rate * rt).exp(),
            DurationRule::ResponseTimeLinear { intercept, slope } => intercept + slope * rt,
            DurationRule::PerCoherenceLevel { values } => values
                .get(ctx.coherence_level)
                .or(values.last())
                .copied()
                .unwrap_or(0.0),
        };
        if raw.is_finite() { raw.max(0.0) } else { 0.0 }
    }
}

/// One rule per trial outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDurations {
    #[serde(default)]
    pub correct: DurationRule,
    #[serde(default)]
    pub incorrect: DurationRule,
    #[serde(default)]
    pub noresponse: DurationRule,
    #[serde(default)]
    pub invalid: DurationRule,
}

impl OutcomeDurations {
    pub fn uniform(rule: DurationRule) -> Self {
        Self {
            correct: rule.clone(),
            incorrect: rule.clone(),
            noresponse: rule.clone(),
            invalid: rule,
        }
    }

    pub fn rule(&self, outcome: Outcome) -> &DurationRule {
        match outcome {
            Outcome::Correct => &self.correct,
            Outcome::Incorrect => &self.incorrect,
            Outcome::NoResponse => &self.noresponse,
            Outcome::Invalid => &self.invalid,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, rule) in [
            ("correct", &self.correct),
            ("incorrect", &self.incorrect),
            ("noresponse", &self.noresponse),
            ("invalid", &self.invalid),
        ] {
            rule.validate().map_err(|e| format!("{name}: {e}"))?;
        }
        Ok(())
    }
}

impl Default for OutcomeDurations {
    fn default() -> Self {
        Self::uniform(DurationRule::default())
    }
}
