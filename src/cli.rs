use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML; a commented default is written if missing
    #[arg(long, default_value = "trialrig.toml")]
    pub config: String,

    /// Subject name (overrides config)
    #[arg(long)]
    pub subject: Option<String>,

    /// Stop after this many completed trials (overrides config)
    #[arg(long)]
    pub trials: Option<u64>,

    /// Directory for subject state and logs (overrides config)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Seed for a reproducible session (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Spontaneous responses per second from the simulated subject
    #[arg(long, default_value_t = 0.5)]
    pub lick_rate: f64,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
