use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, error};

use ember::cleanup::{engine, CleanupTier, RunStatus};
use ember::config::Config;
use ember::sizing::SizeCache;
use ember::supervisor::Supervisor;

/// Ephemeral lifecycle supervisor for GPU creative-tooling containers
#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Supervise a GPU worker and clean up on container exit", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the worker process and run exit cleanup on termination
    Run,
    /// Run a one-shot cleanup at the given tier
    Clean {
        /// Destructiveness tier: basic|enhanced|nuclear|forensic
        tier: CleanupTier,
    },
    /// Report the tracked model-storage size
    Size,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("ember started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Commands::Run => run_supervisor().await,
        Commands::Clean { tier } => run_clean(tier),
        Commands::Size => run_size(),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {e:#}");
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<ember::Error>()
                .map(ember::Error::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run_supervisor() -> anyhow::Result<i32> {
    let config = Config::from_env().context("loading configuration")?;
    let code = Supervisor::new(config).run().await?;
    Ok(code)
}

fn run_clean(tier: CleanupTier) -> anyhow::Result<i32> {
    let config = Config::from_env().context("loading configuration")?;
    let report = engine::run_locked(&config, tier, config.dry_run, config.ignore_pins)?;
    println!("{}", report.summary());
    Ok(match report.status {
        RunStatus::Completed => 0,
        RunStatus::Timeout => 3,
    })
}

fn run_size() -> anyhow::Result<i32> {
    let config = Config::from_env().context("loading configuration")?;
    let cache = SizeCache::new(&config.size_cache_path, config.size_cache_ttl);
    let total_gb = cache.get_size_gb(&config.model_roots());
    println!("model storage: {total_gb:.2} GB");
    Ok(0)
}
