use std::path::PathBuf;

use nnco::model::{HeadKind, ModelConfig};
use nnco::problem::{load_problem, Instance, Problem, ProblemKind};
use nnco::report::{trace_rows, write_summary, write_trace, RunSummary};
use nnco::train::{train, TrainConfig};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nnco-e2e-{}-{name}", std::process::id()))
}

const LOP_4: &str = "4
0 16 11 15
7 0 14 5
22 9 0 8
10 30 12 0
";

const PFSP_4X3: &str = "number of jobs, number of machines, initial seed, upper bound and lower bound :
           4           3   873654221        1278        1232
processing times :
  5  9  8 10
  9  3 10  1
  8 10  5  3
";

#[test]
fn instance_files_load_by_kind() {
    let lop_path = temp_path("lop.txt");
    let pfsp_path = temp_path("pfsp.txt");
    std::fs::write(&lop_path, LOP_4).unwrap();
    std::fs::write(&pfsp_path, PFSP_4X3).unwrap();

    let lop = load_problem(ProblemKind::Lop, &lop_path).unwrap();
    assert!(matches!(lop, Instance::Lop(_)));
    assert_eq!(lop.size(), 4);
    assert_eq!(lop.evaluate(&[0, 1, 2, 3]).unwrap(), 16.0 + 11.0 + 15.0 + 14.0 + 5.0 + 8.0);

    let pfsp = load_problem(ProblemKind::Pfsp, &pfsp_path).unwrap();
    assert_eq!(pfsp.kind(), ProblemKind::Pfsp);
    assert_eq!(pfsp.size(), 4);
    // job 0 alone: 5 + 9 + 8
    assert!(pfsp.evaluate(&[0, 1, 2, 3]).unwrap() > 22.0);

    assert!(load_problem(ProblemKind::Lop, temp_path("missing.txt")).is_err());

    std::fs::remove_file(lop_path).ok();
    std::fs::remove_file(pfsp_path).ok();
}

#[test]
fn trained_run_produces_summary_and_trace_files() {
    let instance_path = temp_path("run-lop.txt");
    std::fs::write(&instance_path, LOP_4).unwrap();
    let problem = load_problem(ProblemKind::Lop, &instance_path).unwrap();

    let model_cfg = ModelConfig {
        noise_dim: 4,
        hidden_dim: 8,
        prehead_layers: 1,
        head: HeadKind::for_problem(ProblemKind::Lop),
        num_samples: 4,
        ..ModelConfig::default()
    };
    let train_cfg = TrainConfig {
        batch_size: 2,
        iterations: Some(6),
        trace: true,
        seed: 9,
        ..TrainConfig::default()
    };
    let run = train(&Default::default(), &problem, &model_cfg, &train_cfg).unwrap();

    let summary =
        RunSummary::from_run(&instance_path, ProblemKind::Lop, &model_cfg, &train_cfg, &run);
    assert_eq!(summary.problem, "lop");
    assert_eq!(summary.problem_size, 4);
    assert_eq!(summary.iterations, 6);
    assert_eq!(summary.max_evaluations, 16_000);
    assert_eq!(summary.num_trainable_params, (4 * 8 + 8) + (8 * 4 + 4));
    assert_eq!(Some(summary.best_fitness), run.best.best());

    let summary_path = temp_path("summary.csv");
    write_summary(&summary_path, &summary).unwrap();
    let text = std::fs::read_to_string(&summary_path).unwrap();
    assert_eq!(text.lines().count(), 2);

    let trace_path = temp_path("trace.csv");
    let rows = trace_rows(&summary, &run);
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.convergence.is_some() && r.mode_log_prob.is_some()));
    write_trace(&trace_path, &rows).unwrap();
    let text = std::fs::read_to_string(&trace_path).unwrap();
    assert_eq!(text.lines().count(), 7);

    for p in [instance_path, summary_path, trace_path] {
        std::fs::remove_file(p).ok();
    }
}
