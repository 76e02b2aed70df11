use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use trialrig::config::SessionConfig;
use trialrig::task::block::{ScheduleStructure, generate_block};
use trialrig::task::{SchedulerState, TrialScheduler, TrialTiming};

fn blocked_config() -> Arc<SessionConfig> {
    let mut cfg = SessionConfig::default();
    cfg.stimulus.coherences = vec![100.0, 72.0, 36.0, 18.0, 9.0, 0.0];
    cfg.stimulus.repeats_per_block = 6;
    cfg.stimulus.schedule_structure = ScheduleStructure::Blocked;
    // keep active bias correction out of the way
    cfg.bias_correction.active_abs_bias_threshold = 2.0;
    cfg.session.rng_seed = Some(17);
    Arc::new(cfg)
}

fn block_coherences(s: &TrialScheduler, first: f64) -> Vec<f64> {
    std::iter::once(first).chain(s.schedule().coherences()).collect()
}

#[test]
fn first_block_is_canonical_then_shuffled() {
    let cfg = blocked_config();
    let mut s = TrialScheduler::new(Arc::clone(&cfg), SchedulerState::fresh(&cfg)).unwrap();

    let params = s.prepare_trial();
    let first_block = block_coherences(&s, params.signed_coherence);
    assert_eq!(first_block.len(), 36);
    assert!(
        first_block
            .windows(2)
            .all(|w| w[0].abs() >= w[1].abs()),
        "first block not sorted by magnitude: {first_block:?}"
    );
    let mut rng = StdRng::seed_from_u64(0);
    let canonical = generate_block(
        &cfg.stimulus.signed_coherences,
        6,
        ScheduleStructure::Blocked,
        cfg.stimulus.max_repeat,
        true,
        &mut rng,
    );
    let canonical: Vec<f64> = canonical.iter().map(|e| e.signed_coherence).collect();
    assert_eq!(first_block, canonical);

    // Answer everything correctly so nothing is inserted.
    let mut params = params;
    for trial in 0..36 {
        if trial > 0 {
            params = s.prepare_trial();
        }
        s.evaluate_outcome(Some(params.target), Some(0.5)).unwrap();
        let record = s.finalize_trial(TrialTiming::default()).unwrap();
        assert!(!record.next_trial.is_correction_trial);
        assert!(!record.next_trial.is_repeat_trial);
    }
    assert!(s.schedule().is_empty());
    assert_eq!(s.schedule().generation(), 1);

    let params = s.prepare_trial();
    assert_eq!(s.schedule().generation(), 2);
    let second_block = block_coherences(&s, params.signed_coherence);
    assert_eq!(second_block.len(), 36);
    assert_ne!(second_block, canonical, "second block should be shuffled");

    let mut a = first_block.clone();
    let mut b = second_block.clone();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    assert_eq!(a, b, "same composition in every block");
}
