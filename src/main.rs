use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, TurnstileConfig};
use turnstile::driver;
use turnstile::lockout::Limiter;

/// Replay login attempts through a sliding-window lockout limiter.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read records from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Failures allowed within the window before lockout
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Sliding window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Lockout length in seconds
    #[arg(long)]
    lockout_secs: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    if let Some(max_attempts) = args.max_attempts {
        config.limiter.max_attempts = max_attempts;
    }
    if let Some(window_secs) = args.window_secs {
        config.limiter.window_secs = window_secs;
    }
    if let Some(lockout_secs) = args.lockout_secs {
        config.limiter.lockout_secs = lockout_secs;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policy = config.limiter.to_policy()?;
    info!(
        max_attempts = policy.max_attempts(),
        window_secs = config.limiter.window_secs,
        lockout_secs = config.limiter.lockout_secs,
        "Limiter initialized"
    );
    let limiter = Limiter::with_system_clock(policy);

    let stdout = io::stdout().lock();
    let summary = match &args.input {
        Some(path) => driver::replay(&limiter, BufReader::new(File::open(path)?), stdout)?,
        None => driver::replay(&limiter, io::stdin().lock(), stdout)?,
    };

    info!(
        processed = summary.processed,
        locked = summary.locked,
        rejected = summary.rejected,
        tracked_keys = limiter.tracked_keys(),
        "Turnstile finished"
    );
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
