use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use trialrig::config::SessionConfig;
use trialrig::core::duration::{DurationRule, OutcomeDurations};
use trialrig::core::sign::Sign;
use trialrig::hardware::HardwareBridge;
use trialrig::hardware::sim::SimulatedBridge;
use trialrig::session::Session;
use trialrig::stimulus::EpochKind;
use trialrig::stimulus::display::HeadlessDisplay;
use trialrig::task::{Outcome, TrainingType, TrialRecord};

fn unique_dir(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "trialrig_epochs_{}_{}",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    path
}

/// Short epochs, a single rightward coherence and no fixation restarts.
fn quick_config(data_dir: &Path) -> SessionConfig {
    let mut cfg = SessionConfig::default();
    let quick = OutcomeDurations::uniform(DurationRule::fixed(0.01));
    cfg.subject.name = "seq01".to_string();
    cfg.session.data_dir = data_dir.display().to_string();
    cfg.session.rng_seed = Some(9);
    cfg.stimulus.coherences = vec![100.0];
    cfg.stimulus.signed_coherences = vec![100.0];
    cfg.epochs.fixation.duration = DurationRule::fixed(0.02);
    cfg.epochs.fixation.restart_on_response = false;
    cfg.epochs.stimulus.max_viewing = 0.4;
    cfg.epochs.reinforcement.durations = quick.clone();
    cfg.epochs.reinforcement.knowledge_of_results = 0.005;
    cfg.epochs.delay = quick.clone();
    cfg.epochs.intertrial = quick;
    cfg.display.frame_rate = 200.0;
    cfg.display.width = 160;
    cfg.display.height = 120;
    cfg
}

fn one_trial(cfg: SessionConfig, sim: &Arc<SimulatedBridge>) -> TrialRecord {
    let bridge: Arc<dyn HardwareBridge> = sim.clone();
    let mut session = Session::start(
        Arc::new(cfg),
        bridge,
        Box::new(HeadlessDisplay::new(0)),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    let record = session.run_trial().unwrap().unwrap();
    session.finish().unwrap();
    record
}

/// Injects `side` every `every` until the returned flag is raised.
fn keep_licking(
    sim: &Arc<SimulatedBridge>,
    side: Sign,
    every: Duration,
) -> (Arc<AtomicBool>, JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let handle = {
        let sim = Arc::clone(sim);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                thread::sleep(every);
                sim.inject(side);
            }
        })
    };
    (done, handle)
}

/// Injects each `(delay_ms, side)` relative to the call.
fn lick_at(sim: &Arc<SimulatedBridge>, script: Vec<(u64, Sign)>) -> JoinHandle<()> {
    let sim = Arc::clone(sim);
    thread::spawn(move || {
        let mut elapsed = 0;
        for (at, side) in script {
            thread::sleep(Duration::from_millis(at.saturating_sub(elapsed)));
            elapsed = at;
            sim.inject(side);
        }
    })
}

fn duration_of(record: &TrialRecord, epoch: EpochKind) -> f64 {
    record.epochs[&epoch].duration
}

#[test]
fn response_during_fixation_restarts_the_hold() {
    let dir = unique_dir("fixation");
    let mut cfg = quick_config(&dir);
    cfg.epochs.fixation.duration = DurationRule::fixed(0.15);
    cfg.epochs.fixation.restart_on_response = true;
    cfg.epochs.stimulus.max_viewing = 0.05;

    let sim = Arc::new(SimulatedBridge::new());
    let licks = lick_at(&sim, vec![(60, Sign::Left)]);
    let record = one_trial(cfg, &sim);
    licks.join().unwrap();

    assert_eq!(record.fixation_restarts, 1);
    assert!(duration_of(&record, EpochKind::Fixation) >= 0.2);
    // the fixation lick is not a choice
    assert_eq!(record.choice, None);
    assert_eq!(record.outcome, Outcome::NoResponse);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn responses_before_min_viewing_are_ignored() {
    let dir = unique_dir("min_viewing");
    let mut cfg = quick_config(&dir);
    cfg.epochs.stimulus.min_viewing = 0.2;
    cfg.epochs.stimulus.max_viewing = 0.8;

    let sim = Arc::new(SimulatedBridge::new());
    let licks = lick_at(&sim, vec![(100, Sign::Right), (350, Sign::Left)]);
    let record = one_trial(cfg, &sim);
    licks.join().unwrap();

    assert_eq!(record.choice, Some(Sign::Left));
    assert_eq!(record.outcome, Outcome::Incorrect);
    let rt = record.response_time.unwrap();
    assert!((0.2..0.8).contains(&rt), "rt={rt}");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn passive_presentation_ignores_responses_and_rewards_target() {
    let dir = unique_dir("passive");
    let mut cfg = quick_config(&dir);
    cfg.training.training_type = TrainingType::PassiveOnly;
    cfg.epochs.stimulus.passive_viewing = DurationRule::fixed(0.08);

    let sim = Arc::new(SimulatedBridge::new());
    let (done, licks) = keep_licking(&sim, Sign::Right, Duration::from_millis(10));
    let record = one_trial(cfg, &sim);
    done.store(true, Ordering::SeqCst);
    licks.join().unwrap();

    assert_eq!(record.choice, None);
    assert_eq!(record.outcome, Outcome::NoResponse);
    assert!(duration_of(&record, EpochKind::Stimulus) >= 0.08 - 1e-3);
    assert!((record.trial_reward - record.reward_volume).abs() < 1e-12);
    assert_eq!(sim.rewards(), vec![(Sign::Right, record.reward_volume)]);
    assert!(!record.next_trial.is_repeat_trial);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_reward_write_scores_no_response() {
    let dir = unique_dir("reward_fault");
    let cfg = quick_config(&dir);

    let sim = Arc::new(SimulatedBridge::new());
    sim.set_fail_writes(true);
    let licks = lick_at(&sim, vec![(80, Sign::Right)]);
    let record = one_trial(cfg, &sim);
    licks.join().unwrap();

    assert_eq!(record.choice, Some(Sign::Right));
    assert_eq!(record.outcome, Outcome::NoResponse);
    assert!(record.reward_fault);
    assert_eq!(record.trial_reward, 0.0);
    assert!(!record.valid);
    assert!(sim.rewards().is_empty());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn delay_and_collected_reward_complete_the_trial() {
    let dir = unique_dir("must_respond");
    let mut cfg = quick_config(&dir);
    cfg.epochs.order = vec![
        EpochKind::Fixation,
        EpochKind::Stimulus,
        EpochKind::Reinforcement,
        EpochKind::Delay,
        EpochKind::MustRespond,
        EpochKind::Intertrial,
    ];
    cfg.epochs.delay = OutcomeDurations::uniform(DurationRule::fixed(0.05));
    cfg.training.must_consume_reward = true;
    cfg.epochs.must_respond.timeout = Some(3.0);

    let sim = Arc::new(SimulatedBridge::new());
    let (done, licks) = keep_licking(&sim, Sign::Right, Duration::from_millis(25));
    let record = one_trial(cfg, &sim);
    done.store(true, Ordering::SeqCst);
    licks.join().unwrap();

    assert_eq!(record.outcome, Outcome::Correct);
    assert_eq!(sim.rewards().len(), 1);
    assert!(duration_of(&record, EpochKind::Delay) >= 0.05 - 1e-3);
    assert!(duration_of(&record, EpochKind::MustRespond) < 1.0);
    let reinf = record.epochs[&EpochKind::Reinforcement];
    let delay = record.epochs[&EpochKind::Delay];
    let collect = record.epochs[&EpochKind::MustRespond];
    assert!(delay.onset >= reinf.onset + reinf.duration - 1e-9);
    assert!(collect.onset >= delay.onset + delay.duration - 1e-9);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn uncollected_reward_times_out() {
    let dir = unique_dir("must_respond_timeout");
    let mut cfg = quick_config(&dir);
    cfg.training.training_type = TrainingType::PassiveOnly;
    cfg.epochs.stimulus.passive_viewing = DurationRule::fixed(0.03);
    cfg.epochs.order = vec![
        EpochKind::Fixation,
        EpochKind::Stimulus,
        EpochKind::Reinforcement,
        EpochKind::MustRespond,
        EpochKind::Intertrial,
    ];
    cfg.training.must_consume_reward = true;
    cfg.epochs.must_respond.timeout = Some(0.12);

    let sim = Arc::new(SimulatedBridge::new());
    let record = one_trial(cfg, &sim);

    assert!(record.trial_reward > 0.0);
    let waited = duration_of(&record, EpochKind::MustRespond);
    assert!((0.12 - 1e-3..1.0).contains(&waited), "waited={waited}");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unrewarded_trial_skips_reward_collection() {
    let dir = unique_dir("must_respond_skip");
    let mut cfg = quick_config(&dir);
    cfg.epochs.stimulus.max_viewing = 0.05;
    cfg.epochs.order = vec![
        EpochKind::Fixation,
        EpochKind::Stimulus,
        EpochKind::Reinforcement,
        EpochKind::MustRespond,
        EpochKind::Intertrial,
    ];
    cfg.training.must_consume_reward = true;
    cfg.epochs.must_respond.timeout = Some(2.0);

    let sim = Arc::new(SimulatedBridge::new());
    let record = one_trial(cfg, &sim);

    assert_eq!(record.outcome, Outcome::NoResponse);
    assert_eq!(record.trial_reward, 0.0);
    assert!(duration_of(&record, EpochKind::MustRespond) < 0.5);
    let _ = fs::remove_dir_all(&dir);
}
