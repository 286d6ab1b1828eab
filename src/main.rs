use clap::Parser;
use memwatch::config::load_config;
use memwatch::{CounterReset, MemoryUnit, MemoryWatcher, DEFAULT_WATCH_CONFIG};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Demo harness for the memwatch watchdog: watch this process's memory,
/// optionally grow it on purpose, and exit once the watchdog fires.
#[derive(Parser, Debug)]
#[command(name = "memwatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "memwatch.toml")]
    config: PathBuf,

    /// Warning limit, e.g. 300KB (overrides config)
    #[arg(long, value_name = "SIZE")]
    warning: Option<MemoryUnit>,

    /// Critical limit, e.g. 512MB (overrides config)
    #[arg(long, value_name = "SIZE")]
    critical: Option<MemoryUnit>,

    /// Consecutive ticks before escalating (overrides config)
    #[arg(long)]
    cycle: Option<u32>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Grace period before exit in milliseconds (overrides config)
    #[arg(long)]
    exit_time_ms: Option<u64>,

    /// Exit code used on termination (overrides config)
    #[arg(long)]
    exit_code: Option<i32>,

    /// Reset the tick counter while below the warning limit instead of above it
    #[arg(long)]
    reset_below_warning: bool,

    /// Allocate this much ballast every interval
    #[arg(long, value_name = "SIZE")]
    grow: Option<MemoryUnit>,

    /// Stop after N intervals, wait two intervals, then start again
    #[arg(long, value_name = "N")]
    pause_after: Option<u32>,

    /// Print the resolved config and exit
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every tick)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("memwatch=debug")
    } else if cli.quiet {
        tracing_subscriber::EnvFilter::new("memwatch=warn")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("memwatch=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut partial = load_config(&cli.config)?.into_watch_config();
    if let Some(warning) = cli.warning {
        partial.warning_limit = warning;
    }
    if let Some(critical) = cli.critical {
        partial.critical_limit = critical;
    }
    if let Some(cycle) = cli.cycle {
        partial.cycle = cycle;
    }
    if let Some(ms) = cli.interval_ms {
        partial.interval = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.exit_time_ms {
        partial.exit_time = Duration::from_millis(ms);
    }
    if let Some(code) = cli.exit_code {
        partial.exit_code = code;
    }
    if cli.reset_below_warning {
        partial.counter_reset = CounterReset::BelowWarning;
    }
    let cfg = partial.merge_with_defaults(&DEFAULT_WATCH_CONFIG);

    if cli.dry_run {
        println!("memwatch v{}", env!("CARGO_PKG_VERSION"));
        println!("  warning_limit:  {}", cfg.warning_limit);
        println!("  critical_limit: {}", cfg.critical_limit);
        println!("  cycle:          {}", cfg.cycle);
        println!("  interval:       {:?}", cfg.interval);
        println!("  exit_time:      {:?}", cfg.exit_time);
        println!("  exit_code:      {}", cfg.exit_code);
        println!("  counter_reset:  {:?}", cfg.counter_reset);
        return Ok(());
    }

    let watcher = Arc::new(MemoryWatcher::new(Some(cfg)));
    let events = watcher.start();

    if cli.grow.is_some() || cli.pause_after.is_some() {
        tokio::spawn(drive(Arc::clone(&watcher), cli.grow, cli.pause_after));
    }

    match events.recv().await {
        Some(event) => {
            println!("{event}: {:?} to clean up", cfg.exit_time);
            // The termination policy ends the process once the grace period expires.
            std::future::pending::<()>().await;
        }
        None => tracing::info!("memory watcher closed without an event"),
    }
    Ok(())
}

/// Grow ballast each interval and optionally exercise a stop/start cycle.
async fn drive(watcher: Arc<MemoryWatcher>, grow: Option<MemoryUnit>, pause_after: Option<u32>) {
    let interval = watcher.config().interval;
    let mut ballast: Vec<Vec<u8>> = Vec::new();
    let mut ticks: u32 = 0;

    loop {
        tokio::time::sleep(interval).await;
        ticks += 1;

        if let Some(size) = grow {
            let bytes = usize::try_from(size.as_bytes()).unwrap_or(0);
            ballast.push(vec![1u8; bytes]);
            let held: usize = ballast.iter().map(Vec::len).sum();
            tracing::info!(held_bytes = held, "ballast grown");
        }

        if pause_after == Some(ticks) {
            tracing::info!(ticks, "pausing memory watcher");
            watcher.stop();
            tokio::time::sleep(interval * 2).await;
            watcher.start();
            tracing::info!("memory watcher resumed");
        }
    }
}
