//! Closed-loop two-alternative trial engine.
//!
//! [`task::scheduler::TrialScheduler`] picks trials and keeps the adaptive
//! statistics, [`session::sequencer::EpochSequencer`] walks each trial
//! through its epochs, [`hardware::monitor::ResponseMonitor`] latches
//! responses and [`stimulus::renderer::RendererHandle`] keeps the display fed.

pub mod cli;
pub mod config;
pub mod core;
pub mod hardware;
pub mod session;
pub mod stimulus;
pub mod task;
