//! DiscoStat CLI

mod rows;
mod run;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ds_inference::{
    AuxSource, EmpiricalSignificance, EvaluateRequest, MassPointResult, RunConfig, ToysRequest,
};
use rows::{ToyRecord, ToyRow};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Offset between the `--seed` flag and the generator seed of a toy run.
const TOY_SEED_BASE: u64 = 10_000;

#[derive(Parser)]
#[command(name = "discostat")]
#[command(about = "DiscoStat - profile-likelihood discovery tests")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Threads (0 = auto). Use 1 for deterministic parity.
    #[arg(long, global = true, default_value = "1")]
    threads: usize,

    /// Run config (YAML or JSON); flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct InputArgs {
    /// Model store (workspace JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// Workspace name
    #[arg(long, default_value = "combined")]
    workspace: String,

    /// Model configuration name
    #[arg(long, default_value = "ModelConfig")]
    model_config: String,

    /// Dataset name
    #[arg(long, default_value = "obsData")]
    data: String,

    /// POI range half-width
    #[arg(long, default_value = "40.0")]
    poi_range: f64,

    /// Auxiliary global-observable tables
    #[arg(long, requires = "aux_index")]
    aux: Option<PathBuf>,

    /// Row of the auxiliary tables to bind
    #[arg(long, requires = "aux")]
    aux_index: Option<usize>,

    /// Signal mass hypothesis, recorded in output rows
    #[arg(long, default_value = "0.0")]
    mass: f64,

    /// Clamp the statistic at 0 and zero it for negative best-fit POI
    #[arg(long)]
    one_sided: bool,
}

impl InputArgs {
    fn aux_source(&self) -> Option<AuxSource> {
        match (&self.aux, self.aux_index) {
            (Some(path), Some(index)) => Some(AuxSource { path: path.clone(), index }),
            _ => None,
        }
    }

    fn apply(&self, config: &mut RunConfig) {
        if self.one_sided {
            config.evaluator.one_sided_discovery = true;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the discovery test statistic on observed data
    Evaluate {
        #[command(flatten)]
        input: InputArgs,

        /// Row index recorded in CSV output (defaults to the auxiliary index)
        #[arg(long)]
        index: Option<usize>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: Format,

        /// Output file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate and evaluate null toys, one CSV row per toy
    Toys {
        #[command(flatten)]
        input: InputArgs,

        /// Run seed; the generator seed is 10000 + seed
        #[arg(long)]
        seed: u64,

        /// Number of null toys (overrides the run config)
        #[arg(long)]
        n_toys: Option<usize>,

        /// Draw global observables from their constraints
        #[arg(long)]
        randomize_globs: bool,

        /// Output CSV file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Empirical p-value and significance from toy CSV files
    Significance {
        /// Observed test statistic
        #[arg(long, allow_hyphen_values = true)]
        observed_q0: f64,

        /// Toy CSV files written by `toys`
        #[arg(long, num_args = 1.., required = true)]
        toys: Vec<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Global significance from per-mass evaluations of toy experiments
    Global {
        /// Observed maximum local significance
        #[arg(long, allow_hyphen_values = true)]
        observed_z: f64,

        /// Evaluation CSV files written by `evaluate --format csv`
        #[arg(long, num_args = 1.., required = true)]
        toys: Vec<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List `index,mass` of evaluations with a failed fit
    FailedFits {
        /// Evaluation CSV files
        #[arg(long, num_args = 1.., required = true)]
        toys: Vec<PathBuf>,

        /// Output CSV file (no header). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace failed evaluations with successful retries
    MergeRetries {
        /// Original evaluation CSV files
        #[arg(long, num_args = 1.., required = true)]
        toys: Vec<PathBuf>,

        /// Retried evaluation CSV files
        #[arg(long, num_args = 1.., required = true)]
        retries: Vec<PathBuf>,

        /// Output CSV file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    if cli.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global();
    }

    match cli.command {
        Commands::Evaluate { input, index, format, output } => {
            let config = run::load_or_default(cli.config.as_deref())?;
            cmd_evaluate(&input, config, index, format, output.as_deref())
        }
        Commands::Toys { input, seed, n_toys, randomize_globs, output } => {
            let config = run::load_or_default(cli.config.as_deref())?;
            cmd_toys(&input, config, seed, n_toys, randomize_globs, output.as_deref())
        }
        Commands::Significance { observed_q0, toys, output } => {
            cmd_significance(observed_q0, &toys, output.as_deref())
        }
        Commands::Global { observed_z, toys, output } => {
            let config = run::load_or_default(cli.config.as_deref())?;
            cmd_global(observed_z, &toys, &config, output.as_deref())
        }
        Commands::FailedFits { toys, output } => {
            let records: Vec<MassPointResult> = rows::read_csv(&toys)?;
            let failed = ds_inference::failed_fits(&records);
            tracing::info!(n_failed = failed.len(), n_results = records.len(), "failed fits");
            rows::write_pairs(output.as_deref(), &failed)
        }
        Commands::MergeRetries { toys, retries, output } => {
            let original: Vec<MassPointResult> = rows::read_csv(&toys)?;
            let retries: Vec<MassPointResult> = rows::read_csv(&retries)?;
            let merged = ds_inference::merge_retries(original, retries)?;
            rows::write_csv(output.as_deref(), &merged)
        }
        Commands::Version => {
            println!("discostat {}", ds_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_evaluate(
    input: &InputArgs,
    mut config: RunConfig,
    index: Option<usize>,
    format: Format,
    output: Option<&Path>,
) -> Result<()> {
    input.apply(&mut config);
    let mut req = EvaluateRequest::new(
        &input.input,
        &input.workspace,
        &input.model_config,
        &input.data,
        input.poi_range,
    );
    req.aux = input.aux_source();
    req.config = config;

    tracing::info!(path = %input.input.display(), workspace = %input.workspace, "evaluating");
    let result = match ds_inference::evaluate(&req) {
        Ok(r) => r,
        Err(e) => {
            let record = serde_json::json!({
                "status": "failed",
                "index": index.or(input.aux_index),
                "mass": input.mass,
                "error": e.to_string(),
            });
            write_json(output, record)?;
            return Err(e.into());
        }
    };
    tracing::info!(q0 = result.ts, muhat = result.muhat, "evaluation complete");

    let index = index.or(input.aux_index).unwrap_or(0);
    match format {
        Format::Json => {
            let mut value = serde_json::to_value(&result)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("index".into(), index.into());
                obj.insert("mass".into(), input.mass.into());
                obj.insert("mu_range".into(), input.poi_range.into());
            }
            write_json(output, value)
        }
        Format::Csv => {
            let row = MassPointResult::from_result(index, input.mass, input.poi_range, &result);
            rows::write_csv(output, &[row])
        }
    }
}

fn cmd_toys(
    input: &InputArgs,
    mut config: RunConfig,
    seed: u64,
    n_toys: Option<usize>,
    randomize_globs: bool,
    output: Option<&Path>,
) -> Result<()> {
    input.apply(&mut config);
    if randomize_globs {
        config.toys.randomize_global_observables = true;
    }
    let n_toys = n_toys.unwrap_or(config.toys.n_toys_null);
    let generator_seed = TOY_SEED_BASE.wrapping_add(seed);
    let req = ToysRequest {
        store_path: input.input.clone(),
        workspace: input.workspace.clone(),
        model_config: input.model_config.clone(),
        data: input.data.clone(),
        n_toys,
        poi_range: input.poi_range,
        seed: generator_seed,
        aux: input.aux_source(),
        config,
    };

    let start = Instant::now();
    let ensemble = ds_inference::run_toys(&req)?;
    let total = start.elapsed().as_secs_f64();
    let avg_time = if n_toys > 0 { total / n_toys as f64 } else { 0.0 };
    tracing::info!(n_toys, seed = generator_seed, total_s = total, avg_s = avg_time, "toys complete");

    let rows: Vec<ToyRow> = ensemble
        .null
        .iter()
        .enumerate()
        .map(|(i, r)| ToyRow::new(generator_seed, i, avg_time, input.poi_range, input.mass, r))
        .collect();
    rows::write_csv(output, &rows)
}

fn cmd_significance(observed_q0: f64, toys: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let records: Vec<ToyRecord> = rows::read_csv(toys)?;
    let n_failed = records.iter().filter(|r| r.failed()).count();
    let q0: Vec<f64> =
        records.iter().filter(|r| !r.failed()).map(|r| r.q0_one_sided()).collect();
    if q0.is_empty() {
        anyhow::bail!("no usable toys in {} record(s)", records.len());
    }
    let sig = EmpiricalSignificance::from_samples(&q0, observed_q0);
    tracing::info!(
        n_used = q0.len(),
        n_failed,
        p_value = sig.p_value,
        z = sig.significance,
        lower_bound = sig.lower_bound,
        "significance"
    );

    write_json(
        output,
        serde_json::json!({
            "observed_q0": observed_q0,
            "n_toys": records.len(),
            "n_failed": n_failed,
            "n_used": q0.len(),
            "p_value": sig.p_value,
            "significance": sig.significance,
            "significance_is_lower_bound": sig.lower_bound,
        }),
    )
}

fn cmd_global(
    observed_z: f64,
    toys: &[PathBuf],
    config: &RunConfig,
    output: Option<&Path>,
) -> Result<()> {
    let records: Vec<MassPointResult> = rows::read_csv(toys)?;
    let result = ds_inference::global_significance(&records, observed_z, &config.global)?;
    tracing::info!(
        n_good_toys = result.n_good_toys,
        p_value = result.p_value,
        z = result.significance,
        trial_factor = result.trial_factor,
        "global significance"
    );
    write_json(output, serde_json::to_value(&result)?)
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
