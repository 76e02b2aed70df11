use rand::Rng;
use serde::{Deserialize, Serialize};

/// Magnitude of the nudge used to break zero-coherence ties.
pub const TIEBREAK_NUDGE: f64 = 1e-2;

/// Response side. Serialized as -1 / +1 to match the recorded choice columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sign {
    Left,
    Right,
}

impl Sign {
    pub fn as_i8(self) -> i8 {
        match self {
            Sign::Left => -1,
            Sign::Right => 1,
        }
    }

    pub fn as_f64(self) -> f64 {
        self.as_i8() as f64
    }

    pub fn opposite(self) -> Self {
        match self {
            Sign::Left => Sign::Right,
            Sign::Right => Sign::Left,
        }
    }

    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            -1 => Some(Sign::Left),
            1 => Some(Sign::Right),
            _ => None,
        }
    }

    /// Strict sign of `x`; zero and non-finite values have no side.
    pub fn of(x: f64) -> Option<Self> {
        if !x.is_finite() || x == 0.0 {
            None
        } else if x > 0.0 {
            Some(Sign::Right)
        } else {
            Some(Sign::Left)
        }
    }

    /// Sign of `x` after adding a random ±`TIEBREAK_NUDGE`.
    ///
    /// Any |x| >= 1e-2 keeps its own sign; zero resolves to a random side.
    pub fn of_with_tiebreak<R: Rng + ?Sized>(x: f64, rng: &mut R) -> Self {
        let nudge = if rng.random::<bool>() {
            TIEBREAK_NUDGE
        } else {
            -TIEBREAK_NUDGE
        };
        let nudged = x + nudge;
        if nudged >= 0.0 {
            Sign::Right
        } else {
            Sign::Left
        }
    }
}

impl Serialize for Sign {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Sign {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i8::deserialize(deserializer)?;
        Sign::from_i8(v).ok_or_else(|| serde::de::Error::custom(format!("invalid side {v}")))
    }
}

impl std::fmt::Display for Sign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sign::Left => write!(f, "left"),
            Sign::Right => write!(f, "right"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn tiebreak_keeps_nonzero_signs() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            assert_eq!(Sign::of_with_tiebreak(9.0, &mut rng), Sign::Right);
            assert_eq!(Sign::of_with_tiebreak(-9.0, &mut rng), Sign::Left);
        }
    }

    #[test]
    fn tiebreak_resolves_zero_to_both_sides() {
        let mut rng = StdRng::seed_from_u64(11);
        let rights = (0..400)
            .filter(|_| Sign::of_with_tiebreak(0.0, &mut rng) == Sign::Right)
            .count();
        assert!(rights > 100 && rights < 300, "rights={rights}");
    }

    #[test]
    fn serializes_as_signed_integer() {
        assert_eq!(serde_json::to_string(&Sign::Left).unwrap(), "-1");
        let s: Sign = serde_json::from_str("1").unwrap();
        assert_eq!(s, Sign::Right);
        assert!(serde_json::from_str::<Sign>("0").is_err());
    }
}
