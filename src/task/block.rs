//! Block schedule: the queue of upcoming trials and the rules that build it.
//!
//! A regular block covers every active signed coherence magnitude
//! `repeats_per_block` times. No block, once generated or amended, holds more
//! than `max_repeat` consecutive entries of one sign when the composition
//! allows it. Zero coherence has no sign and breaks a run.

use std::collections::VecDeque;

use rand::Rng;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::sign::Sign;
use crate::task::performance::CoherenceKey;

/// Upper bound (exclusive) for per-trial stimulus seeds.
pub const SEED_RANGE: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStructure {
    /// Each magnitude's trials stay together; group order is shuffled.
    Blocked,
    #[default]
    Interleaved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    /// Passive bias correction appended after an incorrect easy trial.
    Correction,
    /// Member of an active bias-correction block.
    ActiveCorrection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTrial {
    pub seed: u64,
    pub signed_coherence: f64,
    pub kind: EntryKind,
    /// Re-presentation of an earlier entry; pinned to the front.
    pub repeat: bool,
    /// Side already resolved for this entry, kept when it is re-presented.
    pub target: Option<Sign>,
}

impl ScheduledTrial {
    pub fn regular<R: Rng + ?Sized>(signed_coherence: f64, rng: &mut R) -> Self {
        Self::with_kind(signed_coherence, EntryKind::Regular, rng)
    }

    pub fn with_kind<R: Rng + ?Sized>(signed_coherence: f64, kind: EntryKind, rng: &mut R) -> Self {
        Self {
            seed: rng.random_range(0..SEED_RANGE),
            signed_coherence,
            kind,
            repeat: false,
            target: None,
        }
    }

    pub fn as_repeat(self, target: Sign) -> Self {
        Self {
            repeat: true,
            target: Some(target),
            ..self
        }
    }

    fn side(&self) -> Option<Sign> {
        Sign::of(self.signed_coherence)
    }
}

/// Index at which a same-sign run first exceeds `max_repeat`, if any.
pub fn first_run_violation<I>(coherences: I, max_repeat: usize) -> Option<usize>
where
    I: IntoIterator<Item = f64>,
{
    let mut run_sign: Option<Sign> = None;
    let mut run_len = 0usize;
    for (i, c) in coherences.into_iter().enumerate() {
        match Sign::of(c) {
            Some(s) if Some(s) == run_sign => run_len += 1,
            Some(s) => {
                run_sign = Some(s);
                run_len = 1;
            }
            None => {
                run_sign = None;
                run_len = 0;
            }
        }
        if run_len > max_repeat {
            return Some(i);
        }
    }
    None
}

pub fn longest_sign_run<I>(coherences: I) -> usize
where
    I: IntoIterator<Item = f64>,
{
    let mut best = 0;
    let mut run_sign = None;
    let mut run_len = 0;
    for c in coherences {
        let s = Sign::of(c);
        if s.is_some() && s == run_sign {
            run_len += 1;
        } else {
            run_sign = s;
            run_len = usize::from(s.is_some());
        }
        best = best.max(run_len);
    }
    best
}

/// Reorder `seq` so no run exceeds `max_repeat`, leaving the first `pinned`
/// entries in place. Returns false when the composition makes that
/// impossible; `seq` then holds the best partial repair.
pub fn repair_sign_runs(seq: &mut Vec<ScheduledTrial>, max_repeat: usize, pinned: usize) -> bool {
    let max_repeat = max_repeat.max(1);
    loop {
        let Some(i) = first_run_violation(seq.iter().map(|t| t.signed_coherence), max_repeat)
        else {
            return true;
        };
        if i < pinned {
            return false;
        }
        let run_side = seq[i].side();

        // Pull the nearest later entry that breaks the run into position i.
        if let Some(j) = (i + 1..seq.len()).find(|&j| seq[j].side() != run_side) {
            let breaker = seq.remove(j);
            seq.insert(i, breaker);
            continue;
        }

        // The tail is all one side: move the offending entry earlier.
        let item = seq.remove(i);
        let mut placed = false;
        for k in (pinned..i).rev() {
            seq.insert(k, item);
            let prefix = seq[..=i].iter().map(|t| t.signed_coherence);
            if first_run_violation(prefix, max_repeat).is_none() {
                placed = true;
                break;
            }
            seq.remove(k);
        }
        if !placed {
            seq.insert(i, item);
            return false;
        }
    }
}

/// Signed coherences grouped by magnitude, largest magnitude first.
/// Within a group, negative values come first.
fn magnitude_groups(signed: &[f64]) -> Vec<Vec<f64>> {
    let mut sorted: Vec<f64> = signed.iter().copied().filter(|c| c.is_finite()).collect();
    sorted.sort_by_key(|&c| (std::cmp::Reverse(CoherenceKey::magnitude(c)), CoherenceKey::new(c)));
    sorted.dedup_by_key(|c| CoherenceKey::new(*c));
    let mut groups: Vec<Vec<f64>> = Vec::new();
    for c in sorted {
        match groups.last_mut() {
            Some(g) if CoherenceKey::magnitude(g[0]) == CoherenceKey::magnitude(c) => g.push(c),
            _ => groups.push(vec![c]),
        }
    }
    groups
}

/// One regular block.
///
/// `canonical` produces the reproducible first-block order: descending
/// magnitude, signs alternating within a magnitude. Otherwise the block is
/// shuffled according to `structure` and then repaired.
pub fn generate_block<R: Rng + ?Sized>(
    signed_coherences: &[f64],
    repeats_per_block: usize,
    structure: ScheduleStructure,
    max_repeat: usize,
    canonical: bool,
    rng: &mut R,
) -> Vec<ScheduledTrial> {
    let mut groups: Vec<Vec<f64>> = magnitude_groups(signed_coherences)
        .into_iter()
        .map(|g| (0..repeats_per_block).map(|k| g[k % g.len()]).collect())
        .collect();

    if !canonical {
        match structure {
            ScheduleStructure::Interleaved => {
                let mut flat: Vec<f64> = groups.into_iter().flatten().collect();
                flat.shuffle(rng);
                groups = vec![flat];
            }
            ScheduleStructure::Blocked => {
                groups.shuffle(rng);
                for g in &mut groups {
                    g.shuffle(rng);
                }
            }
        }
    }

    let mut block: Vec<ScheduledTrial> = groups
        .into_iter()
        .flatten()
        .map(|c| ScheduledTrial::regular(c, rng))
        .collect();
    if !repair_sign_runs(&mut block, max_repeat, 0) {
        debug!(
            target: "scheduler",
            "block of {} trials cannot satisfy max_repeat={max_repeat}",
            block.len()
        );
    }
    block
}

/// Support and weights for the active bias-correction block length:
/// `P(v) ∝ exp(-lambda * (v - offset))` for `v` in `min..=max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockLengthDistribution {
    #[serde(default = "BlockLengthDistribution::default_min")]
    pub min: usize,
    #[serde(default = "BlockLengthDistribution::default_max")]
    pub max: usize,
    #[serde(default = "BlockLengthDistribution::default_lambda")]
    pub lambda: f64,
    #[serde(default = "BlockLengthDistribution::default_offset")]
    pub offset: f64,
}

impl BlockLengthDistribution {
    fn default_min() -> usize {
        7
    }
    fn default_max() -> usize {
        13
    }
    fn default_lambda() -> f64 {
        1.0
    }
    fn default_offset() -> f64 {
        4.0
    }

    pub fn support(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }

    pub fn weights(&self) -> Vec<f64> {
        self.support()
            .map(|v| (-self.lambda * (v as f64 - self.offset)).exp())
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min == 0 || self.max < self.min {
            return Err(format!(
                "block length support {}..={} is empty or starts at zero",
                self.min, self.max
            ));
        }
        if !self.lambda.is_finite() || !self.offset.is_finite() {
            return Err("block length lambda/offset must be finite".to_string());
        }
        if WeightedIndex::new(self.weights()).is_err() {
            return Err("block length weights underflow; lower lambda".to_string());
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match WeightedIndex::new(self.weights()) {
            Ok(dist) => self.min + dist.sample(rng),
            Err(_) => self.min,
        }
    }
}

impl Default for BlockLengthDistribution {
    fn default() -> Self {
        Self {
            min: Self::default_min(),
            max: Self::default_max(),
            lambda: Self::default_lambda(),
            offset: Self::default_offset(),
        }
    }
}

/// Active bias-correction block: `floor(len * strength)` trials toward
/// `correction_side`, the rest away from it, magnitudes drawn from
/// `magnitudes`, order shuffled then repaired where possible.
pub fn generate_active_block<R: Rng + ?Sized>(
    len: usize,
    correction_side: Sign,
    strength: f64,
    magnitudes: &[f64],
    max_repeat: usize,
    rng: &mut R,
) -> Vec<ScheduledTrial> {
    let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 1.0 };
    let toward = ((len as f64 * strength).floor() as usize).min(len);
    let mut sides: Vec<Sign> = std::iter::repeat_n(correction_side, toward)
        .chain(std::iter::repeat_n(correction_side.opposite(), len - toward))
        .collect();
    sides.shuffle(rng);

    let mut block: Vec<ScheduledTrial> = sides
        .into_iter()
        .map(|side| {
            let magnitude = magnitudes
                .get(rng.random_range(0..magnitudes.len().max(1)))
                .copied()
                .unwrap_or(100.0)
                .abs();
            ScheduledTrial::with_kind(side.as_f64() * magnitude, EntryKind::ActiveCorrection, rng)
        })
        .collect();
    if !repair_sign_runs(&mut block, max_repeat, 0) {
        debug!(
            target: "scheduler",
            "active block ({toward}/{len} toward {correction_side}) keeps a run > {max_repeat}"
        );
    }
    block
}

/// Queue of upcoming trials. The scheduler is its only writer.
#[derive(Debug, Clone)]
pub struct BlockSchedule {
    entries: VecDeque<ScheduledTrial>,
    max_repeat: usize,
    generation: u64,
}

impl BlockSchedule {
    pub fn new(max_repeat: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_repeat: max_repeat.max(1),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blocks installed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn front(&self) -> Option<&ScheduledTrial> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledTrial> {
        self.entries.iter()
    }

    pub fn replace(&mut self, block: Vec<ScheduledTrial>) {
        self.entries = block.into();
        self.generation += 1;
    }

    pub fn pop_front(&mut self) -> Option<ScheduledTrial> {
        self.entries.pop_front()
    }

    /// Put an entry back at the front unchanged (interrupted trial).
    pub fn restore_front(&mut self, entry: ScheduledTrial) {
        self.entries.push_front(entry);
    }

    /// Repeat entries go to the front and stay there.
    pub fn push_repeat(&mut self, entry: ScheduledTrial, target: Sign) {
        self.entries.push_front(entry.as_repeat(target));
        self.repair();
    }

    /// Correction entries go to the back; the run repair may move them.
    pub fn push_correction(&mut self, entry: ScheduledTrial) {
        self.entries.push_back(entry);
        self.repair();
    }

    fn pinned(&self) -> usize {
        self.entries.iter().take_while(|e| e.repeat).count()
    }

    fn repair(&mut self) {
        let pinned = self.pinned();
        let mut seq: Vec<ScheduledTrial> = self.entries.drain(..).collect();
        if !repair_sign_runs(&mut seq, self.max_repeat, pinned) {
            debug!(
                target: "scheduler",
                "schedule of {} entries keeps a run > {} after insertion",
                seq.len(),
                self.max_repeat
            );
        }
        self.entries = seq.into();
    }

    pub fn satisfies_run_limit(&self) -> bool {
        first_run_violation(self.coherences(), self.max_repeat).is_none()
    }

    pub fn coherences(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.signed_coherence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const COHS: [f64; 11] = [-100.0, -72.0, -36.0, -18.0, -9.0, 0.0, 9.0, 18.0, 36.0, 72.0, 100.0];

    fn entry(c: f64) -> ScheduledTrial {
        ScheduledTrial {
            seed: 0,
            signed_coherence: c,
            kind: EntryKind::Regular,
            repeat: false,
            target: None,
        }
    }

    #[test]
    fn zero_breaks_runs() {
        assert_eq!(first_run_violation([1.0, 1.0, 1.0, 0.0, 1.0], 3), None);
        assert_eq!(first_run_violation([1.0, 1.0, 1.0, 1.0], 3), Some(3));
        assert_eq!(longest_sign_run([-1.0, -1.0, 0.0, 5.0]), 2);
    }

    #[test]
    fn canonical_block_is_descending_and_alternating() {
        let mut rng = StdRng::seed_from_u64(1);
        let block = generate_block(&COHS, 2, ScheduleStructure::Blocked, 3, true, &mut rng);
        let cohs: Vec<f64> = block.iter().map(|t| t.signed_coherence).collect();
        assert_eq!(
            cohs,
            vec![
                -100.0, 100.0, -72.0, 72.0, -36.0, 36.0, -18.0, 18.0, -9.0, 9.0, 0.0, 0.0
            ]
        );
    }

    #[test]
    fn repair_handles_skewed_tail() {
        let mut seq: Vec<ScheduledTrial> = [-1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
            .into_iter()
            .map(entry)
            .collect();
        assert!(repair_sign_runs(&mut seq, 3, 0));
        assert!(first_run_violation(seq.iter().map(|t| t.signed_coherence), 3).is_none());
        assert_eq!(seq.len(), 7);
    }

    #[test]
    fn repair_reports_impossible_composition() {
        let mut seq: Vec<ScheduledTrial> = [1.0; 5].into_iter().map(entry).collect();
        assert!(!repair_sign_runs(&mut seq, 3, 0));
    }

    #[test]
    fn repair_respects_pinned_prefix() {
        let mut seq: Vec<ScheduledTrial> = [5.0, 1.0, 1.0, 1.0, -1.0, -1.0]
            .into_iter()
            .map(entry)
            .collect();
        assert!(repair_sign_runs(&mut seq, 3, 1));
        assert_eq!(seq[0].signed_coherence, 5.0);
    }

    #[test]
    fn block_length_sampler_stays_in_support() {
        let dist = BlockLengthDistribution::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen_min = false;
        for _ in 0..500 {
            let n = dist.sample(&mut rng);
            assert!(dist.support().contains(&n));
            seen_min |= n == 7;
        }
        assert!(seen_min);
        assert!(dist.validate().is_ok());
    }

    #[test]
    fn active_block_composition() {
        let mut rng = StdRng::seed_from_u64(4);
        let block = generate_active_block(10, Sign::Left, 0.7, &[100.0, 72.0], 3, &mut rng);
        assert_eq!(block.len(), 10);
        let left = block.iter().filter(|t| t.signed_coherence < 0.0).count();
        assert_eq!(left, 7);
        assert!(block.iter().all(|t| t.kind == EntryKind::ActiveCorrection));
        assert!(block.iter().all(|t| [72.0, 100.0].contains(&t.signed_coherence.abs())));
    }

    #[test]
    fn repeat_stays_at_front() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut schedule = BlockSchedule::new(3);
        schedule.replace(generate_block(&COHS, 4, ScheduleStructure::Interleaved, 3, false, &mut rng));
        let repeated = ScheduledTrial::regular(72.0, &mut rng);
        schedule.push_repeat(repeated, Sign::Right);
        let front = schedule.front().unwrap();
        assert!(front.repeat);
        assert_eq!(front.target, Some(Sign::Right));
        assert_eq!(front.seed, repeated.seed);
        assert!(schedule.satisfies_run_limit());
    }
}
