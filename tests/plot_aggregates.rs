use std::sync::Arc;

use trialrig::config::SessionConfig;
use trialrig::task::{SchedulerState, TrialScheduler, TrialTiming};

#[test]
fn trial_distribution_matches_choice_counts() {
    let mut cfg = SessionConfig::default();
    cfg.session.rng_seed = Some(77);
    let cfg = Arc::new(cfg);
    let mut s = TrialScheduler::new(Arc::clone(&cfg), SchedulerState::fresh(&cfg)).unwrap();

    let mut valid = 0u64;
    for i in 0..300u64 {
        let p = s.prepare_trial();
        let choice = match i % 7 {
            0 => None,
            1 | 4 => Some(p.target.opposite()),
            _ => Some(p.target),
        };
        s.evaluate_outcome(choice, choice.map(|_| 0.2 + (i % 5) as f64 * 0.1))
            .unwrap();
        let record = s.finalize_trial(TrialTiming::default()).unwrap();
        if record.valid {
            valid += 1;
        }
    }

    let mut total = 0;
    for (coherence, agg) in s.plots().iter() {
        assert_eq!(
            agg.trial_distribution,
            agg.chose_left + agg.chose_right,
            "coherence {coherence}"
        );
        if agg.trial_distribution > 0 {
            let expected = agg.chose_right as f64 / agg.trial_distribution as f64;
            assert!((agg.psychometric - expected).abs() < 1e-12);
            assert!(agg.response_time.is_some());
        }
        total += agg.trial_distribution;
    }
    assert_eq!(total, valid);
    assert_eq!(valid, s.counters().valid);
}
