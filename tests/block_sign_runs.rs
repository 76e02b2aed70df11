use rand::SeedableRng;
use rand::rngs::StdRng;

use trialrig::core::sign::Sign;
use trialrig::task::block::{
    BlockSchedule, EntryKind, ScheduleStructure, ScheduledTrial, generate_block,
    longest_sign_run,
};

const SIGNED: [f64; 11] = [
    -100.0, -72.0, -36.0, -18.0, -9.0, 0.0, 9.0, 18.0, 36.0, 72.0, 100.0,
];

#[test]
fn generated_blocks_never_exceed_max_repeat() {
    for seed in 0..200u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        for structure in [ScheduleStructure::Blocked, ScheduleStructure::Interleaved] {
            for max_repeat in 1..=4 {
                let block = generate_block(&SIGNED, 6, structure, max_repeat, false, &mut rng);
                assert_eq!(block.len(), 36);
                let run = longest_sign_run(block.iter().map(|e| e.signed_coherence));
                assert!(
                    run <= max_repeat,
                    "seed {seed} {structure:?} max_repeat {max_repeat}: run {run}"
                );
            }
        }
    }
}

#[test]
fn nonzero_only_blocks_stay_within_limit() {
    let signed = [-100.0, -36.0, 36.0, 100.0];
    for seed in 0..200u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let block = generate_block(&signed, 10, ScheduleStructure::Interleaved, 3, false, &mut rng);
        assert!(longest_sign_run(block.iter().map(|e| e.signed_coherence)) <= 3);
    }
}

#[test]
fn amended_schedule_keeps_run_limit() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut schedule = BlockSchedule::new(3);
    schedule.replace(generate_block(
        &SIGNED,
        6,
        ScheduleStructure::Interleaved,
        3,
        false,
        &mut rng,
    ));
    for i in 0..20 {
        let entry = schedule.pop_front().unwrap();
        if i % 3 == 0 {
            let correction = ScheduledTrial::with_kind(72.0, EntryKind::Correction, &mut rng);
            schedule.push_correction(correction);
        } else if i % 5 == 0 {
            let target = Sign::of(entry.signed_coherence).unwrap_or(Sign::Right);
            schedule.push_repeat(entry, target);
        }
        assert!(schedule.satisfies_run_limit(), "after amendment {i}");
    }
}
