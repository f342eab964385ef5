use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "peakgroup - Bayesian grouping and identification of mass-spectrometry features.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for the likelihood precomputation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Group features that derive from the same analyte.
    Cluster(ClusterArgs),
    /// Group features and explain every group by a molecule of a catalog.
    Identify(IdentifyArgs),
}

/// Inputs and sampler overrides shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Long-format feature table (feature,replicate,mz,intensity,rt,polarity).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub features: PathBuf,

    /// Chromatographic signals (feature,replicate,rt,intensity).
    #[arg(short, long, value_name = "PATH")]
    pub signals: Option<PathBuf>,

    /// Path to the configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path for the output CSV file.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Write every retained sample as CSV rows (sample,feature,cluster,cluster_size).
    #[arg(long, value_name = "PATH")]
    pub trace: Option<PathBuf>,

    /// Override the random seed from the config file.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Override the number of retained samples.
    #[arg(long, value_name = "INT")]
    pub num_samples: Option<usize>,

    /// Override the number of burn-in sweeps.
    #[arg(short, long, value_name = "INT")]
    pub burn_in: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S correlation.rt-window=20
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `cluster` subcommand.
#[derive(Args, Debug)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Write the pairwise co-clustering probabilities as a CSV matrix.
    #[arg(long, value_name = "PATH")]
    pub co_clustering: Option<PathBuf>,
}

/// Arguments for the `identify` subcommand.
#[derive(Args, Debug)]
pub struct IdentifyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Molecule catalog (molecule,formula,adduct,mz,intensity,polarity,rt).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub molecules: PathBuf,

    /// Connectivity network: one molecule per line followed by its related molecules.
    #[arg(short = 'n', long, value_name = "PATH")]
    pub network: Option<PathBuf>,

    /// Write per-molecule support counts as CSV (molecule,formula,support,fraction).
    #[arg(long, value_name = "PATH")]
    pub support: Option<PathBuf>,
}
