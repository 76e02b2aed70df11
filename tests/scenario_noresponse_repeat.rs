use std::sync::Arc;

use trialrig::config::SessionConfig;
use trialrig::task::{Outcome, SchedulerState, TrainingType, TrialScheduler, TrialTiming};

fn scheduler(training: TrainingType) -> TrialScheduler {
    let mut cfg = SessionConfig::default();
    cfg.training.training_type = training;
    cfg.session.rng_seed = Some(23);
    let cfg = Arc::new(cfg);
    TrialScheduler::new(Arc::clone(&cfg), SchedulerState::fresh(&cfg)).unwrap()
}

#[test]
fn active_only_timeout_is_repeated_at_front() {
    let mut s = scheduler(TrainingType::ActiveOnly);
    let params = s.prepare_trial();
    let ev = s.evaluate_outcome(None, None).unwrap();
    assert_eq!(ev.outcome, Outcome::NoResponse);
    assert_eq!(ev.reward_volume, 0.0);

    let record = s.finalize_trial(TrialTiming::default()).unwrap();
    assert!(record.next_trial.is_repeat_trial);
    assert!(!record.valid);

    let front = s.schedule().front().copied().unwrap();
    assert!(front.repeat);
    assert_eq!(front.seed, params.seed);
    assert_eq!(front.signed_coherence, params.signed_coherence);

    let again = s.prepare_trial();
    assert!(again.is_repeat_trial);
    assert_eq!(again.target, params.target);
}

#[test]
fn active_passive_timeout_is_half_rewarded_and_not_repeated() {
    let mut s = scheduler(TrainingType::ActivePassive);
    s.prepare_trial();
    let ev = s.evaluate_outcome(None, None).unwrap();
    assert_eq!(ev.outcome, Outcome::NoResponse);
    assert_eq!(ev.reward_volume, s.reward_volume() * 0.5);
    let record = s.finalize_trial(TrialTiming::default()).unwrap();
    assert!(!record.next_trial.is_repeat_trial);
    assert!(!record.valid);
    assert!(!s.schedule().front().is_some_and(|e| e.repeat));
}
