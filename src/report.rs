//! CSV output: a one-row run summary and an optional per-iteration trace.
//!
//! Column names are human-readable (`"best fitness"`, `"num samples"`, ...) so that runs from
//! different configurations can be concatenated and loaded as one table.

use std::path::{Path, PathBuf};

use burn_core::module::Module;
use serde::{Deserialize, Serialize};

use crate::model::ModelConfig;
use crate::problem::ProblemKind;
use crate::train::{TrainConfig, TrainedRun};
use crate::Result;

/// Name of the only fitness normalization in the crate.
pub const UTILITY_FUNCTION: &str = "standardized_utility";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub instance: String,
    pub problem: String,
    #[serde(rename = "problem size")]
    pub problem_size: usize,
    #[serde(rename = "max evaluations")]
    pub max_evaluations: usize,
    pub iterations: usize,
    #[serde(rename = "batch size")]
    pub batch_size: usize,
    #[serde(rename = "num samples")]
    pub num_samples: usize,
    #[serde(rename = "noise length")]
    pub noise_length: usize,
    #[serde(rename = "hidden dim")]
    pub hidden_dim: usize,
    #[serde(rename = "prehead layers")]
    pub prehead_layers: usize,
    #[serde(rename = "learning rate")]
    pub learning_rate: f64,
    #[serde(rename = "utility function")]
    pub utility_function: String,
    #[serde(rename = "elapsed time in secs")]
    pub elapsed_secs: f64,
    #[serde(rename = "best fitness")]
    pub best_fitness: f64,
    #[serde(rename = "num trainable params")]
    pub num_trainable_params: usize,
    pub seed: u64,
}

/// Last path component of `path`, or the whole string if there is none.
pub fn instance_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl RunSummary {
    pub fn from_run(
        instance: &Path,
        kind: ProblemKind,
        model_cfg: &ModelConfig,
        train_cfg: &TrainConfig,
        run: &TrainedRun,
    ) -> Self {
        Self {
            instance: instance_name(instance),
            problem: kind.as_str().to_string(),
            problem_size: run.best_solution.len(),
            max_evaluations: run.max_evaluations,
            iterations: run.iterations,
            batch_size: train_cfg.batch_size,
            num_samples: model_cfg.num_samples,
            noise_length: model_cfg.noise_dim,
            hidden_dim: model_cfg.hidden_dim,
            prehead_layers: model_cfg.prehead_layers,
            learning_rate: train_cfg.learning_rate,
            utility_function: UTILITY_FUNCTION.to_string(),
            elapsed_secs: run.elapsed.as_secs_f64(),
            best_fitness: run.best.best().unwrap_or(f64::NAN),
            num_trainable_params: run.model.num_params(),
            seed: train_cfg.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    pub iteration: usize,
    #[serde(rename = "best fitness")]
    pub best_fitness: f64,
    #[serde(rename = "mean fitness")]
    pub mean_fitness: f64,
    pub loss: f64,
    pub convergence: Option<f64>,
    #[serde(rename = "mode log-prob")]
    pub mode_log_prob: Option<f64>,
    pub instance: String,
    pub problem: String,
    #[serde(rename = "batch size")]
    pub batch_size: usize,
    #[serde(rename = "noise length")]
    pub noise_length: usize,
    #[serde(rename = "hidden dim")]
    pub hidden_dim: usize,
    #[serde(rename = "prehead layers")]
    pub prehead_layers: usize,
}

pub fn trace_rows(summary: &RunSummary, run: &TrainedRun) -> Vec<TraceRow> {
    run.history
        .iter()
        .map(|r| TraceRow {
            iteration: r.iteration,
            best_fitness: r.best_fitness,
            mean_fitness: r.mean_fitness,
            loss: r.loss,
            convergence: r.diagnostics.map(|d| d.convergence),
            mode_log_prob: r.diagnostics.and_then(|d| d.mode_log_prob),
            instance: summary.instance.clone(),
            problem: summary.problem.clone(),
            batch_size: summary.batch_size,
            noise_length: summary.noise_length,
            hidden_dim: summary.hidden_dim,
            prehead_layers: summary.prehead_layers,
        })
        .collect()
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the summary as a header plus exactly one row.
pub fn write_summary(path: impl AsRef<Path>, summary: &RunSummary) -> Result<()> {
    write_rows(path.as_ref(), std::slice::from_ref(summary))
}

pub fn write_trace(path: impl AsRef<Path>, rows: &[TraceRow]) -> Result<()> {
    write_rows(path.as_ref(), rows)
}

/// `run-<16 hex digits>.csv` in the working directory.
pub fn generated_summary_path(rng: &mut impl rand::Rng) -> PathBuf {
    PathBuf::from(format!("run-{:016x}.csv", rng.random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn summary() -> RunSummary {
        RunSummary {
            instance: "N-t65b11xx".into(),
            problem: "lop".into(),
            problem_size: 44,
            max_evaluations: 1_936_000,
            iterations: 945,
            batch_size: 32,
            num_samples: 64,
            noise_length: 128,
            hidden_dim: 128,
            prehead_layers: 1,
            learning_rate: 0.003,
            utility_function: UTILITY_FUNCTION.into(),
            elapsed_secs: 1.5,
            best_fitness: 12345.0,
            num_trainable_params: 22_316,
            seed: 7,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nnco-{}-{name}", std::process::id()))
    }

    #[test]
    fn summary_is_one_header_and_one_row() {
        let path = temp_path("summary.csv");
        write_summary(&path, &summary()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("instance,problem,problem size,max evaluations"));
        assert!(lines[0].contains("best fitness"));

        let mut r = csv::Reader::from_path(&path).unwrap();
        let back: Vec<RunSummary> = r.deserialize().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(back, vec![summary()]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn trace_leaves_missing_diagnostics_empty() {
        let path = temp_path("trace.csv");
        let row = TraceRow {
            iteration: 0,
            best_fitness: 3.0,
            mean_fitness: 1.0,
            loss: -0.25,
            convergence: None,
            mode_log_prob: None,
            instance: "i".into(),
            problem: "pfsp".into(),
            batch_size: 2,
            noise_length: 4,
            hidden_dim: 4,
            prehead_layers: 1,
        };
        write_trace(&path, &[row.clone(), TraceRow { iteration: 1, ..row }]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("0,3.0,1.0,-0.25,,,i,pfsp"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn generated_paths_are_distinct_csv_files() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let a = generated_summary_path(&mut rng);
        let b = generated_summary_path(&mut rng);
        assert_ne!(a, b);
        let name = a.to_string_lossy();
        assert!(name.starts_with("run-") && name.ends_with(".csv"));
        assert_eq!(name.len(), "run-".len() + 16 + ".csv".len());
    }

    #[test]
    fn instance_name_strips_directories() {
        assert_eq!(instance_name(Path::new("instances/lop/N-be75eec")), "N-be75eec");
    }
}
