use anyhow::Result;
use clap::Parser;
use guardian::scheduler::TriggerName;
use guardian::{GuardianConfig, GuardianOrchestrator};
use std::path::Path;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "guardian")]
#[command(about = "Activity capture daemon with AI analysis and daily summaries")]
#[command(version)]
#[command(long_about = "Continuously captures audio, screenshots, and keystrokes, runs each \
capture through an AI analysis service, and aggregates the results into per-day activity \
files and an end-of-day summary report.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "guardian.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the daemon")]
    validate_config: bool,

    /// Generate the daily summary immediately and exit
    #[arg(long, help = "Generate the daily summary for today (or --day) and exit")]
    summary_now: bool,

    /// Day for --summary-now, YYYY-MM-DD (defaults to today)
    #[arg(long, value_name = "DATE", help = "Day to summarize with --summary-now")]
    day: Option<String>,

    /// Run retention cleanup immediately and exit
    #[arg(long, help = "Run data and log retention cleanup and exit")]
    cleanup_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match GuardianConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {e}");
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let log_level = if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    let log_guard = guardian::logging::init(log_level, Path::new(&config.system.log_dir))?;

    info!("Starting Guardian v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut orchestrator = GuardianOrchestrator::from_config(config).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.initialize().map_err(|e| {
        error!("Failed to initialize components: {}", e);
        e
    })?;

    // One-shot modes run a single trigger without starting capture.
    if args.summary_now {
        let day = args.day.unwrap_or_else(guardian::storage::today_key);
        match orchestrator.generate_summary_for(&day).await? {
            Some(path) => println!("Summary written to {}", path.display()),
            None => println!("No activity data for {day}, nothing to summarize"),
        }
        return Ok(());
    }
    if args.cleanup_now {
        orchestrator.run_trigger_now(TriggerName::Cleanup).await?;
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Guardian exited with code: {}", exit_code);
    // Flush the file appender before the process is torn down.
    drop(log_guard);
    std::process::exit(exit_code);
}
