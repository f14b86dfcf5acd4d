//main.rs
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use progressive_kmeans::termination::presets;
use progressive_kmeans::{
    ElbowConfig, EnsembleConfig, InitMode, MetricSet, ProgressiveElbow, ProgressiveEnsemble,
    SampleMatrix,
};

/// Progressive ensemble K-means on a TSV/CSV table; prints one JSON result per line.
#[derive(Parser)]
#[command(version, author = "Stefan L. <stefan.lang@med.lu.se>")]
struct Opts {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cluster with a fixed number of clusters
    Ensemble {
        #[arg(short, long)]
        k: usize,

        /// Do not keep cluster ids stable between results
        #[arg(long)]
        no_stabilize: bool,

        /// Minimum time between two results
        #[arg(long)]
        min_interval_ms: Option<u64>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Try several cluster counts and report the elbow of the inertia curve
    Elbow {
        /// Comma separated, strictly increasing cluster counts [default: 2..=10]
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<usize>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Input table with a header line
    #[arg(short, long)]
    file: PathBuf,

    /// Comma separated input instead of tab separated
    #[arg(long)]
    csv: bool,

    #[arg(long, default_value_t = 4)]
    runs: usize,

    /// random or k-means++
    #[arg(long, default_value = "k-means++")]
    init: InitMode,

    #[arg(long, default_value_t = 300)]
    max_iter: usize,

    #[arg(long, default_value_t = 1e-4)]
    tol: f64,

    #[arg(long)]
    seed: Option<u64>,

    /// Early-termination preset: fast-notify, slow-notify, fast-kill or slow-kill
    #[arg(long = "terminator")]
    terminators: Vec<String>,

    /// Validation metric to report with every result, or "all"
    #[arg(long = "metric")]
    metrics: Vec<String>,

    /// Write the final labels here, one per line
    #[arg(short, long)]
    outfile: Option<PathBuf>,
}

impl CommonArgs {
    fn load(&self) -> anyhow::Result<SampleMatrix> {
        let data = if self.csv {
            SampleMatrix::from_csv(&self.file)
        } else {
            SampleMatrix::from_tsv(&self.file)
        }
        .with_context(|| format!("failed to load {}", self.file.display()))?;
        info!(
            samples = data.n_samples(),
            features = data.n_features(),
            "loaded {}",
            self.file.display()
        );
        Ok(data)
    }
}

fn emit<T: Serialize>(out: &mut impl Write, result: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, result)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn write_labels(path: &Path, labels: &[usize]) -> anyhow::Result<()> {
    let text = labels.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!(samples = labels.len(), "labels written to {}", path.display());
    Ok(())
}

fn run_ensemble(k: usize, no_stabilize: bool, min_interval_ms: Option<u64>, common: CommonArgs) -> anyhow::Result<()> {
    let data = common.load()?;
    let mut config = EnsembleConfig::new(k)
        .with_runs(common.runs)
        .with_init(common.init)
        .with_max_iter(common.max_iter)
        .with_tol(common.tol)
        .with_stabilize_labels(!no_stabilize);
    if let Some(seed) = common.seed {
        config = config.with_seed(seed);
    }
    if let Some(ms) = min_interval_ms {
        config = config.with_min_interval(Duration::from_millis(ms));
    }

    let ensemble = ProgressiveEnsemble::new(data, config)?
        .with_terminators(presets(&common.terminators)?)?
        .with_metrics(MetricSet::from_names(&common.metrics)?);

    let mut out = io::stdout().lock();
    let mut last = None;
    for result in ensemble {
        emit(&mut out, &result)?;
        last = Some(result);
    }
    if let (Some(path), Some(last)) = (&common.outfile, &last) {
        write_labels(path, &last.labels)?;
    }
    Ok(())
}

fn run_elbow(candidates: Vec<usize>, common: CommonArgs) -> anyhow::Result<()> {
    let data = common.load()?;
    let mut config = ElbowConfig::default()
        .with_runs(common.runs)
        .with_init(common.init)
        .with_max_iter(common.max_iter)
        .with_tol(common.tol);
    if !candidates.is_empty() {
        config.candidates = candidates;
    }
    if let Some(seed) = common.seed {
        config = config.with_seed(seed);
    }

    let elbow = ProgressiveElbow::new(data, config)?
        .with_terminators(presets(&common.terminators)?)?
        .with_metrics(MetricSet::from_names(&common.metrics)?);

    let mut out = io::stdout().lock();
    let mut results = Vec::new();
    for result in elbow {
        let result = result?;
        emit(&mut out, &result)?;
        results.push(result);
    }

    if let Some(path) = &common.outfile {
        // Labels at the elbow when one was found, otherwise for the largest candidate.
        let elbow = results.last().and_then(|r| r.elbow);
        let chosen = results
            .iter()
            .find(|r| Some(r.n_clusters) == elbow)
            .or(results.last());
        if let Some(chosen) = chosen {
            write_labels(path, &chosen.labels)?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let filter = match opts.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    match opts.command {
        Command::Ensemble {
            k,
            no_stabilize,
            min_interval_ms,
            common,
        } => run_ensemble(k, no_stabilize, min_interval_ms, common),
        Command::Elbow { candidates, common } => run_elbow(candidates, common),
    }
}
