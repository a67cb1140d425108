//! Entry point for the ens_stat application.
//! Handles CLI parsing, logging setup, and dispatches the pipeline and the hofx diagnostics.

use clap::Parser;
use ens_stat::config::PipelineConfig;
use ens_stat::diagnostics::{compare_hofx, list_differences, HofxRequest};
use ens_stat::errors::Result;
use ens_stat::pipeline::{Pipeline, Stage};
use ens_stat::store::NetCdfStore;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "ens_stat=debug" } else { "ens_stat=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run_pipeline(config_path: &Path, stages: &[Stage], threads: Option<usize>) -> Result<()> {
    let mut config = PipelineConfig::from_path(config_path)?;
    if threads.is_some() {
        config.threads = threads;
    }
    let store = NetCdfStore::new(&config.data_dir)?;
    let pipeline = Pipeline::new(&config, &store)?;

    println!(
        "Running {} for {} case(s), {} cycle(s), {} member(s) of '{}' at layer {}",
        Stage::canonical(stages)
            .iter()
            .map(|stage| stage.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        config.cases.len(),
        pipeline.cycles().len(),
        config.member_count,
        config.variable_name,
        config.layer_index
    );

    for report in pipeline.run(stages)? {
        println!(
            "✅ {:<8} {:>5} output(s) in {:.2?}",
            report.stage.as_str(),
            report.outputs,
            report.elapsed
        );
    }
    println!("Aggregates stored under {}", store.root().display());
    Ok(())
}

fn run_hofx(request: &HofxRequest<'_>, output_dir: &Path, no_plot: bool) -> Result<()> {
    let report = compare_hofx(request, (!no_plot).then_some(output_dir))?;
    let summary = report.summary;

    println!("{}: {} (GsiHofXBc - hofx)", request.obs_type, request.variable);
    println!("count = {}", summary.count);
    println!("rms   = {:.6}", summary.rms);
    println!("max   = {:.6}", summary.max);
    println!("min   = {:.6}", summary.min);
    println!(
        "{} of {} differences fall in [{}, {}]",
        report.histogram.total(),
        summary.count,
        report.histogram.lower,
        report.histogram.upper
    );
    for figure in &report.figures {
        println!("✅ Saved {}", figure.display());
    }
    Ok(())
}

fn run_omb(
    file: &Path,
    obs_type: &str,
    variable: &str,
    subtask: Option<&str>,
    threshold: f64,
) -> Result<()> {
    let listing = list_differences(file, variable, threshold)?;

    match subtask {
        Some(subtask) => println!("{obs_type}: {variable} ({subtask})"),
        None => println!("{obs_type}: {variable}"),
    }
    println!("Total observations: {}", listing.total);
    println!(
        "{} observation(s) with |GsiHofX - hofx| > {}",
        listing.records.len(),
        listing.threshold
    );

    let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
    for r in &listing.records {
        println!(
            "{:>8} sid={:<8} diff={:>12.6} ufo={:>12.4} gsi={:>12.4} height={:>10.1} \
             lat={} lon={} type={} use={} elev={}",
            r.index,
            r.station_id.as_deref().unwrap_or("-"),
            r.diff,
            r.ufo,
            r.gsi,
            r.height,
            show(r.latitude),
            show(r.longitude),
            show(r.obs_type),
            show(r.use_flag),
            show(r.station_elevation),
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Run {
            config,
            stages,
            threads,
        } => run_pipeline(config, stages, *threads),
        Commands::Hofx {
            file,
            obs_type,
            variable,
            subtask,
            output_dir,
            no_plot,
        } => run_hofx(
            &HofxRequest {
                file,
                obs_type,
                variable,
                subtask,
            },
            output_dir,
            *no_plot,
        ),
        Commands::Omb {
            file,
            obs_type,
            variable,
            subtask,
            threshold,
        } => run_omb(file, obs_type, variable, subtask.as_deref(), *threshold),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // causes are already part of the message
            eprintln!("❌ Error: {e}");
            ExitCode::FAILURE
        }
    }
}
