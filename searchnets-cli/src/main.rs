//! Searchnets CLI: command-line driver for visual search network training.
//!
//! Loads an experiment configuration, sets up logging and runs the job grid.

mod commands;

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Searchnets: train convolutional networks on visual search tasks
#[derive(Parser, Debug)]
#[command(name = "searchnets", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Load a configuration and train every network it describes
    Train {
        /// Path to the configuration file
        config: PathBuf,

        /// Directory holding pretrained weights as <net_name>.json
        #[arg(long)]
        pretrained_dir: Option<PathBuf>,

        /// Side length images are resized to before training
        #[arg(long, default_value_t = commands::DEFAULT_IMAGE_SIZE)]
        image_size: u32,
    },
    /// Validate a configuration and print the job plan without training
    Check {
        /// Path to the configuration file
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            pretrained_dir,
            image_size,
        } => {
            let config = commands::load(&config)?;
            let _guard = init_tracing(cli.verbose, cli.quiet, Some(config.train().save_path()));
            commands::train(&config, pretrained_dir, image_size)
        }
        Commands::Check { config } => {
            let _guard = init_tracing(cli.verbose, cli.quiet, None);
            let config = commands::load(&config)?;
            commands::check(&config)
        }
    }
}

/// Human-readable stderr logging, plus a JSON file log under
/// `<save_path>/logs` when a run writes results.
fn init_tracing(verbose: u8, quiet: bool, save_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let Some(save_path) = save_path else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    };

    let log_dir = save_path.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "searchnets.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Some(guard)
}
