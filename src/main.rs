mod archive;
mod classfile;
mod config;
mod descriptor;
mod driver;
mod elements;
mod error;
mod filter;
mod metadata;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod unwanted;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use tracing::{error, warn};

use crate::archive::{filter_archive, filtered_path};
use crate::config::{AnnotationNames, AnnotationPolicy, ConfigFile, DEFAULT_MAX_PASSES, FilterConfig};
use crate::telemetry::{Telemetry, init_logging};

/// CLI arguments for jarfilter execution.
#[derive(Parser, Debug)]
#[command(
    name = "jarfilter",
    about = "Delete, stub or strip annotated members of JVM archives, keeping Kotlin metadata consistent.",
    version
)]
struct Cli {
    #[arg(long, value_name = "JAR", required = true, num_args = 1..)]
    input: Vec<PathBuf>,
    #[arg(long, value_name = "DIR")]
    output_dir: PathBuf,
    /// JSON file with `annotations`, `maxPasses` and `preserveTimestamps`.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Annotation marking elements to delete, e.g. `com.example.Delete`.
    #[arg(long, value_name = "ANNOTATION")]
    delete: Vec<String>,
    /// Annotation marking methods whose bodies become stubs.
    #[arg(long, value_name = "ANNOTATION")]
    stub: Vec<String>,
    /// Annotation stripped from every element that carries it.
    #[arg(long, value_name = "ANNOTATION")]
    remove: Vec<String>,
    #[arg(long, value_name = "N")]
    max_passes: Option<usize>,
    /// Normalize timestamps and drop permissions for byte-stable output.
    #[arg(long)]
    reproducible: bool,
    /// OTLP/HTTP collector endpoint for tracing spans.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let jobs = plan_outputs(&cli)?;
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;

    let telemetry = cli.otel.as_deref().map(Telemetry::connect).transpose()?.map(Arc::new);
    let results: Vec<_> = jobs
        .par_iter()
        .map(|(input, target)| filter_archive(input, target, &config, telemetry.as_deref()))
        .collect();
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }

    let mut failures = 0;
    for result in results {
        match result {
            Ok(report) => {
                if !cli.quiet {
                    println!(
                        "{} -> {} ({} rewritten, {} deleted)",
                        report.source.display(),
                        report.target.display(),
                        report.classes_rewritten,
                        report.classes_deleted
                    );
                }
            }
            Err(err) => {
                error!("{err:#}");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} archives failed", jobs.len());
    }
    Ok(())
}

/// Merge the config file with command-line values; the command line wins.
fn build_config(cli: &Cli) -> Result<FilterConfig> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let mut names = file.annotations;
    names.merge(AnnotationNames {
        for_remove: cli.remove.clone(),
        for_delete: cli.delete.clone(),
        for_stub: cli.stub.clone(),
    });
    let policy = AnnotationPolicy::new(&names)?;
    if policy.is_empty() {
        warn!("no annotations configured, archives are copied unchanged");
    }
    let max_passes = cli.max_passes.or(file.max_passes).unwrap_or(DEFAULT_MAX_PASSES);
    let preserve_timestamps = !cli.reproducible && file.preserve_timestamps.unwrap_or(true);
    Ok(FilterConfig::new(policy, max_passes, preserve_timestamps)?)
}

/// Pair every input with its output path, rejecting missing inputs and
/// inputs that would overwrite each other's output.
fn plan_outputs(cli: &Cli) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut targets: BTreeMap<PathBuf, &PathBuf> = BTreeMap::new();
    let mut jobs = Vec::with_capacity(cli.input.len());
    for input in &cli.input {
        if !input.is_file() {
            anyhow::bail!("input not found: {}", input.display());
        }
        let target = filtered_path(input, &cli.output_dir);
        if let Some(previous) = targets.insert(target.clone(), input) {
            anyhow::bail!(
                "inputs {} and {} both write {}",
                previous.display(),
                input.display(),
                target.display()
            );
        }
        jobs.push((input.clone(), target));
    }
    Ok(jobs)
}
