// Entry point: headless session against the simulated rig.
use std::process::ExitCode;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trialrig::cli::Args;
use trialrig::config::SessionConfig;
use trialrig::hardware::sim::SimulatedBridge;
use trialrig::session::{Session, SessionError};
use trialrig::stimulus::display::HeadlessDisplay;

fn run(args: Args, stop: Arc<AtomicBool>) -> Result<(), SessionError> {
    let mut config = SessionConfig::load_or_default(&args.config)?;
    if let Some(subject) = args.subject {
        config.subject.name = subject;
    }
    if let Some(trials) = args.trials {
        config.session.max_trials = Some(trials);
    }
    if let Some(dir) = args.data_dir {
        config.session.data_dir = dir;
    }
    if let Some(seed) = args.seed {
        config.session.rng_seed = Some(seed);
    }
    let config = Arc::new(config);

    let seed = config.session.rng_seed.unwrap_or_default();
    let bridge = Arc::new(SimulatedBridge::with_lick_rate(args.lick_rate, seed));
    let display = Box::new(HeadlessDisplay::new(0));

    let mut session = Session::start(Arc::clone(&config), bridge, display, Arc::clone(&stop))?;
    info!("logging to {}", session.log_dir().display());
    let completed = session.run()?;
    if stop.load(Ordering::SeqCst) {
        warn!("stopped by user after {completed} trials");
    }
    let summary = session.finish()?;
    info!(
        "done: {} attempts, {:.1}% correct, {:.1} uL",
        summary.attempts,
        summary.percent_correct.unwrap_or(0.0),
        summary.total_reward_ul
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    match run(args, stop_flag) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
