use std::sync::Arc;

use trialrig::config::SessionConfig;
use trialrig::core::sign::Sign;
use trialrig::task::block::ScheduleStructure;
use trialrig::task::{SchedulerState, TrialScheduler, TrialTiming};

fn biased_run(structure: ScheduleStructure, seed: u64) -> Vec<(usize, Sign, f64)> {
    let mut cfg = SessionConfig::default();
    cfg.stimulus.coherences = vec![100.0, 72.0];
    cfg.stimulus.signed_coherences = vec![-100.0, -72.0, 72.0, 100.0];
    cfg.stimulus.schedule_structure = structure;
    // keep the active block out of the way
    cfg.bias_correction.active_abs_bias_threshold = 2.0;
    cfg.session.rng_seed = Some(seed);
    let cfg = Arc::new(cfg);
    let mut s = TrialScheduler::new(Arc::clone(&cfg), SchedulerState::fresh(&cfg)).unwrap();

    let mut corrections = Vec::new();
    for i in 0..300 {
        let p = s.prepare_trial();
        if p.is_correction_trial {
            corrections.push((i, p.target, p.signed_coherence));
        }
        s.evaluate_outcome(Some(Sign::Right), Some(0.4)).unwrap();
        s.finalize_trial(TrialTiming::default()).unwrap();
    }
    corrections
}

#[test]
fn interleaved_corrections_pull_against_bias() {
    for seed in [1, 7, 23] {
        let corrections = biased_run(ScheduleStructure::Interleaved, seed);
        let late: Vec<_> = corrections.iter().filter(|(i, ..)| *i >= 40).collect();
        assert!(late.len() >= 20, "seed {seed}: {} corrections", late.len());
        for (i, target, coherence) in late {
            assert_eq!(*target, Sign::Left, "seed {seed} trial {i}");
            assert!(*coherence < 0.0);
            assert!(coherence.abs() == 100.0 || coherence.abs() == 72.0);
        }
    }
}

#[test]
fn blocked_corrections_repeat_the_missed_coherence() {
    let corrections = biased_run(ScheduleStructure::Blocked, 3);
    assert!(!corrections.is_empty());
    // a rightward subject only misses leftward trials
    assert!(corrections.iter().all(|(_, target, c)| *target == Sign::Left && *c < 0.0));
}
