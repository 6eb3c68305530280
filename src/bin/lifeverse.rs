//! Lifeverse command-line driver
//!
//! Runs a multiverse batch or trains a learned influence matrix from JSON
//! files and prints the result as JSON on stdout.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueHint};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use lifeverse::{
    run_multiverse, run_multiverse_laned, train_learned_matrix, CheckinRecord, MetricId, MultiverseConfig,
    NoHooks, ReferenceScoring, TrainerOptions, TrainingWindow,
};

type DynError = Box<dyn Error>;

type Result<T> = std::result::Result<T, DynError>;

#[derive(Parser)]
#[command(author, version, about = "Seeded multiverse simulation and influence training")]
struct Cli {
    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Write the JSON output to a file instead of stdout
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a multiverse batch from a MultiverseConfig JSON file
    Simulate(SimulateArgs),

    /// Train a learned influence matrix from a checkin history JSON file
    Train(TrainArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// Path to the MultiverseConfig JSON file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Split the batch across this many independently seeded lanes
    #[arg(long)]
    lanes: Option<usize>,
}

#[derive(Args)]
struct TrainArgs {
    /// Path to a JSON array of checkin records
    #[arg(long, value_hint = ValueHint::FilePath)]
    checkins: PathBuf,

    /// Lag order (1-3)
    #[arg(long, default_value_t = 2)]
    lags: u8,

    /// Trailing window in days, or "all"
    #[arg(long, default_value = "all")]
    window: WindowArg,

    /// Comma-separated metric ids to train on (default: all)
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<MetricId>,
}

#[derive(Clone, Copy)]
struct WindowArg(TrainingWindow);

impl FromStr for WindowArg {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Self(TrainingWindow::All));
        }
        raw.parse::<usize>()
            .map(|days| Self(TrainingWindow::Days(days)))
            .map_err(|_| format!("expected a day count or \"all\", got {raw:?}"))
    }
}

fn main() {
    init_tracing();
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Simulate(args) => {
            let config: MultiverseConfig = read_json(&args.config)?;
            let result = match args.lanes {
                Some(lanes) => run_multiverse_laned(&config, &ReferenceScoring, &NoHooks, lanes)?,
                None => run_multiverse(&config, &ReferenceScoring, &NoHooks)?,
            };
            info!(run_id = %result.run_id, runs = result.audit.runs_completed, "simulation complete");
            emit(&cli, &result)
        }
        Command::Train(args) => {
            let checkins: Vec<CheckinRecord> = read_json(&args.checkins)?;
            let metrics = if args.metrics.is_empty() {
                MetricId::ALL.to_vec()
            } else {
                args.metrics.clone()
            };
            let options = TrainerOptions::new(Utc::now()).lags(args.lags).window(args.window.0);
            let learned = train_learned_matrix(&checkins, &metrics, &options)?;
            info!(
                days = learned.meta.trained_on_days,
                alpha = learned.meta.alpha,
                insufficient = learned.meta.insufficient_data,
                "training complete"
            );
            emit(&cli, &learned)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid JSON in {}: {e}", path.display()).into())
}

fn emit<T: Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let json = if cli.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    match &cli.output {
        Some(path) => fs::write(path, json).map_err(|e| format!("failed to write {}: {e}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
