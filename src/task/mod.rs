//! Adaptive trial selection: block schedules, bias correction, reward
//! homeostasis and performance bookkeeping.

pub mod bias;
pub mod block;
pub mod graduation;
pub mod performance;
pub mod reward;
pub mod scheduler;

pub use scheduler::{
    Evaluation, NextTrialFlags, Outcome, SchedulerError, SchedulerState, TrainingType,
    TrialParameters, TrialRecord, TrialScheduler, TrialTiming,
};
