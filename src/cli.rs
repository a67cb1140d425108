//! Defines command-line interface options using `clap` for the ens_stat application.

use clap::{Parser, Subcommand};
use ens_stat::pipeline::Stage;
use ens_stat::statistics::hofx::DEFAULT_LIST_THRESHOLD;
use std::path::PathBuf;

/// Ensemble statistics and hofx diagnostics for FV3 and JEDI/UFO NetCDF files
#[derive(Parser, Debug)]
#[command(name = "ens_stat", version, about)]
pub struct Cli {
    /// Enable verbose (debug) logging. RUST_LOG takes precedence when set.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run pipeline stages over every configured case and cycle
    Run {
        /// Path to the JSON pipeline configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Comma-separated stages: extract, reduce, members, plot
        #[arg(
            long,
            value_delimiter = ',',
            value_parser = parse_stage,
            default_value = "extract,reduce,plot"
        )]
        stages: Vec<Stage>,

        /// Worker threads for member reads. Overrides the configuration file.
        #[arg(short = 't', long)]
        threads: Option<usize>,
    },

    /// Compare GSI and UFO hofx for one variable of an observation file
    Hofx {
        /// UFO output NetCDF file
        file: PathBuf,
        /// Observation type label used in titles and file names
        obs_type: String,
        /// Observation variable, e.g. air_temperature
        variable: String,
        /// Subtask label appended to figure names
        subtask: String,

        /// Directory for the figures
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Print the summary only
        #[arg(long)]
        no_plot: bool,
    },

    /// List observations whose GSI and UFO hofx differ by more than a threshold
    Omb {
        /// UFO output NetCDF file
        file: PathBuf,
        /// Observation type label
        obs_type: String,
        /// Observation variable, e.g. air_temperature
        variable: String,
        /// Subtask label, shown in the report header
        subtask: Option<String>,

        /// Absolute difference above which an observation is listed
        #[arg(long, default_value_t = DEFAULT_LIST_THRESHOLD)]
        threshold: f64,
    },
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse::<Stage>().map_err(|e| e.to_string())
}
