use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use nnco::model::{HeadKind, ModelConfig};
use nnco::problem::{load_problem, Problem, ProblemKind};
use nnco::report::{generated_summary_path, trace_rows, write_summary, write_trace, RunSummary};
use nnco::train::{train, TrainConfig};

#[derive(Parser, Debug)]
#[command(name = "nnco")]
#[command(about = "Train a neural permutation model on a LOP or PFSP instance and write a CSV summary")]
struct Args {
    /// Path to the instance file.
    #[arg(short, long, value_name = "PATH")]
    instance: PathBuf,

    /// Combinatorial problem: lop or pfsp.
    #[arg(short, long)]
    problem: ProblemKind,

    /// Noise vectors per iteration.
    #[arg(short, long, value_name = "N")]
    batch_size: usize,

    /// Hidden layer width.
    #[arg(short = 'd', long, value_name = "N")]
    hidden_dim: usize,

    /// Number of pre-head layers.
    #[arg(short = 'l', long, value_name = "N")]
    prehead_layers: usize,

    /// Length of the noise vector.
    #[arg(short, long, value_name = "N")]
    noise_len: usize,

    /// Where to write the CSV summary (defaults to a generated `run-<hex>.csv`).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Solutions sampled per noise vector.
    #[arg(long, default_value_t = 64)]
    num_samples: usize,

    #[arg(long, default_value_t = 0.003)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Override the `1000 * n^2` evaluation budget.
    #[arg(long)]
    max_evaluations: Option<usize>,

    /// Override the iteration count derived from the budget.
    #[arg(long)]
    iterations: Option<usize>,

    /// Also write a per-iteration CSV trace with convergence diagnostics.
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,

    /// Weight of the Plackett-Luce mode log-probability penalty (LOP only).
    #[arg(long, default_value_t = 0.0)]
    mode_penalty: f64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let problem = load_problem(args.problem, &args.instance).with_context(|| {
        format!(
            "loading {} instance {}",
            args.problem.as_str(),
            args.instance.display()
        )
    })?;
    info!(
        instance = %args.instance.display(),
        problem = args.problem.as_str(),
        size = problem.size(),
        "instance loaded"
    );

    let model_cfg = ModelConfig {
        noise_dim: args.noise_len,
        hidden_dim: args.hidden_dim,
        prehead_layers: args.prehead_layers,
        head: HeadKind::for_problem(args.problem),
        num_samples: args.num_samples,
        ..ModelConfig::default()
    };
    let train_cfg = TrainConfig {
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        max_evaluations: args.max_evaluations,
        iterations: args.iterations,
        seed: args.seed,
        trace: args.trace.is_some(),
        mode_penalty: args.mode_penalty,
    };

    let run = train(&Default::default(), &problem, &model_cfg, &train_cfg)?;
    let summary = RunSummary::from_run(&args.instance, args.problem, &model_cfg, &train_cfg, &run);

    let output = args
        .output
        .unwrap_or_else(|| generated_summary_path(&mut rand::rng()));
    write_summary(&output, &summary)
        .with_context(|| format!("writing summary to {}", output.display()))?;
    info!(path = %output.display(), best = summary.best_fitness, "summary written");

    if let Some(path) = args.trace {
        write_trace(&path, &trace_rows(&summary, &run))
            .with_context(|| format!("writing trace to {}", path.display()))?;
        info!(path = %path.display(), "trace written");
    }
    Ok(())
}
