//! qcal Command-Line Interface
//!
//! Plans calibration runs for a chip topology and inspects execution records.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use qcal_task::{CalibConfig, LogFormat};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{conflicts, cr_schedule, one_qubit, record};

/// qcal - calibration scheduling for superconducting qubit chips
#[derive(Parser)]
#[command(name = "qcal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "QCAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule two-qubit (CR) calibrations into parallel groups
    CrSchedule {
        /// Topology file (YAML)
        #[arg(short, long)]
        topology: PathBuf,

        /// Qubit metrics file with frequencies and quality values (JSON or YAML)
        #[arg(short, long)]
        metrics: Option<PathBuf>,

        /// Restrict to pairs between these qubits
        #[arg(long, value_delimiter = ',')]
        candidates: Option<Vec<String>>,

        /// Maximum pairs per parallel group
        #[arg(long, default_value = "10")]
        max_group_size: usize,

        /// Graph coloring strategy
        #[arg(long, default_value = "largest_first")]
        coloring: String,

        /// Schedule the inverse direction
        #[arg(long)]
        inverse: bool,

        /// Drop pairs whose qubits fall below a quality threshold (METRIC=THRESHOLD)
        #[arg(long)]
        quality: Option<String>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Schedule single-qubit calibrations into box stages
    OneQubit {
        /// Topology file (YAML)
        #[arg(short, long)]
        topology: PathBuf,

        /// Qubits to schedule
        #[arg(long, value_delimiter = ',', conflicts_with = "muxes")]
        qids: Option<Vec<String>>,

        /// Schedule every qubit of these MUXes
        #[arg(long, value_delimiter = ',')]
        muxes: Option<Vec<u32>>,

        /// Qubits to leave out when scheduling by MUX
        #[arg(long, value_delimiter = ',', requires = "muxes")]
        exclude: Option<Vec<String>>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show MUX box types and the MUX conflict map
    Conflicts {
        /// Topology file (YAML)
        #[arg(short, long)]
        topology: PathBuf,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show a stored execution record, or list records
    Record {
        /// Execution ID (lists all records if omitted)
        #[arg(short, long)]
        execution_id: Option<String>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

fn init_logging(verbose: u8, config: &CalibConfig) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Console => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match CalibConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };
    init_logging(cli.verbose, &config);

    let result = match cli.command {
        Commands::CrSchedule {
            topology,
            metrics,
            candidates,
            max_group_size,
            coloring,
            inverse,
            quality,
            format,
        } => cr_schedule::execute(cr_schedule::CrScheduleArgs {
            topology: &topology,
            metrics: metrics.as_deref(),
            candidates: candidates.as_deref(),
            max_group_size,
            coloring: &coloring,
            inverse,
            quality: quality.as_deref(),
            format: &format,
        }),

        Commands::OneQubit {
            topology,
            qids,
            muxes,
            exclude,
            format,
        } => one_qubit::execute(
            &topology,
            qids.as_deref(),
            muxes.as_deref(),
            exclude.as_deref().unwrap_or_default(),
            &format,
        ),

        Commands::Conflicts { topology, format } => conflicts::execute(&topology, &format),

        Commands::Record {
            execution_id,
            format,
        } => record::execute(&config, execution_id.as_deref(), &format).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
