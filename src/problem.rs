//! Black-box objectives over permutations.
//!
//! The training loop only sees the [`Problem`] trait: a size, an optimization direction, and a
//! pure `evaluate`. Two reference instances are provided:
//!
//! - [`Lop`]: Linear Ordering Problem, **maximize** \(\sum_{i<j} M[\sigma_i][\sigma_j]\)
//! - [`Pfsp`]: Permutation Flow-Shop Scheduling, **minimize** total flow time
//!
//! Instance text formats:
//!
//! - LOP: the size `n`, then `n × n` integers (whitespace separated).
//! - PFSP (Taillard): a header line, a line starting with `jobs machines`, another header line,
//!   then `machines` rows of `jobs` processing times.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::is_permutation;
use crate::{Error, Result};

/// Whether larger or smaller fitness is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// Factor applied to `mean(log p ⊙ u)` so that gradient *descent* on the loss moves
    /// probability mass toward better solutions.
    pub fn loss_sign(self) -> f32 {
        match self {
            Direction::Maximize => -1.0,
            Direction::Minimize => 1.0,
        }
    }

    /// `true` iff `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }
}

/// An evaluation oracle over permutations of `0..size()`.
pub trait Problem {
    fn size(&self) -> usize;
    fn direction(&self) -> Direction;
    /// Deterministic, side-effect free.
    fn evaluate(&self, permutation: &[usize]) -> Result<f64>;
}

/// Supported problem families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    Lop,
    Pfsp,
}

impl ProblemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProblemKind::Lop => "lop",
            ProblemKind::Pfsp => "pfsp",
        }
    }
}

impl FromStr for ProblemKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lop" => Ok(ProblemKind::Lop),
            "pfsp" => Ok(ProblemKind::Pfsp),
            other => Err(Error::Config(format!("unsupported problem kind: {other:?}"))),
        }
    }
}

/// A loaded instance of either family.
#[derive(Debug, Clone)]
pub enum Instance {
    Lop(Lop),
    Pfsp(Pfsp),
}

impl Instance {
    pub fn kind(&self) -> ProblemKind {
        match self {
            Instance::Lop(_) => ProblemKind::Lop,
            Instance::Pfsp(_) => ProblemKind::Pfsp,
        }
    }
}

impl Problem for Instance {
    fn size(&self) -> usize {
        match self {
            Instance::Lop(p) => p.size(),
            Instance::Pfsp(p) => p.size(),
        }
    }

    fn direction(&self) -> Direction {
        match self {
            Instance::Lop(p) => p.direction(),
            Instance::Pfsp(p) => p.direction(),
        }
    }

    fn evaluate(&self, permutation: &[usize]) -> Result<f64> {
        match self {
            Instance::Lop(p) => p.evaluate(permutation),
            Instance::Pfsp(p) => p.evaluate(permutation),
        }
    }
}

/// Load an instance file of the given family.
pub fn load_problem(kind: ProblemKind, path: impl AsRef<Path>) -> Result<Instance> {
    match kind {
        ProblemKind::Lop => Lop::from_file(path).map(Instance::Lop),
        ProblemKind::Pfsp => Pfsp::from_file(path).map(Instance::Pfsp),
    }
}

fn check_solution(permutation: &[usize], size: usize) -> Result<()> {
    if permutation.len() != size {
        return Err(Error::Oracle(format!(
            "solution has length {}, instance size is {size}",
            permutation.len()
        )));
    }
    if !is_permutation(permutation) {
        return Err(Error::Oracle(format!("not a permutation: {permutation:?}")));
    }
    Ok(())
}

fn parse_numbers<'a>(tokens: impl Iterator<Item = &'a str>, count: usize) -> Result<Vec<f64>> {
    let values = tokens
        .take(count)
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| Error::Parse(format!("not a number: {t:?}")))
        })
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != count {
        return Err(Error::Parse(format!(
            "expected {count} matrix entries, found {}",
            values.len()
        )));
    }
    Ok(values)
}

fn parse_usize(token: Option<&str>, what: &str) -> Result<usize> {
    let token = token.ok_or_else(|| Error::Parse(format!("missing {what}")))?;
    token
        .parse()
        .map_err(|_| Error::Parse(format!("invalid {what}: {token:?}")))
}

/// Linear Ordering Problem instance (maximization).
#[derive(Debug, Clone, PartialEq)]
pub struct Lop {
    size: usize,
    /// Row-major `size × size`.
    matrix: Vec<f64>,
}

impl Lop {
    pub fn new(size: usize, matrix: Vec<f64>) -> Result<Self> {
        if size == 0 {
            return Err(Error::Domain("LOP size must be >= 1"));
        }
        if matrix.len() != size * size {
            return Err(Error::Shape("LOP matrix must have size * size entries"));
        }
        Ok(Self { size, matrix })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let size = parse_usize(tokens.next(), "LOP size")?;
        let matrix = parse_numbers(tokens, size * size)?;
        Self::new(size, matrix)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

impl Problem for Lop {
    fn size(&self) -> usize {
        self.size
    }

    fn direction(&self) -> Direction {
        Direction::Maximize
    }

    fn evaluate(&self, permutation: &[usize]) -> Result<f64> {
        check_solution(permutation, self.size)?;
        let n = self.size;
        let mut total = 0.0;
        for (i, &a) in permutation.iter().enumerate() {
            for &b in &permutation[i + 1..] {
                total += self.matrix[a * n + b];
            }
        }
        Ok(total)
    }
}

/// Permutation Flow-Shop Scheduling instance (minimization of total flow time).
///
/// A solution lists jobs in processing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pfsp {
    jobs: usize,
    machines: usize,
    /// Row-major `machines × jobs` processing times.
    times: Vec<f64>,
}

impl Pfsp {
    pub fn new(jobs: usize, machines: usize, times: Vec<f64>) -> Result<Self> {
        if jobs == 0 || machines == 0 {
            return Err(Error::Domain("PFSP needs at least one job and one machine"));
        }
        if times.len() != jobs * machines {
            return Err(Error::Shape("PFSP matrix must have machines * jobs entries"));
        }
        Ok(Self {
            jobs,
            machines,
            times,
        })
    }

    pub fn machines(&self) -> usize {
        self.machines
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        lines.next();
        let mut dims = lines
            .next()
            .ok_or_else(|| Error::Parse("missing PFSP dimensions line".into()))?
            .split_whitespace();
        let jobs = parse_usize(dims.next(), "PFSP job count")?;
        let machines = parse_usize(dims.next(), "PFSP machine count")?;
        lines.next();
        let rest: Vec<&str> = lines.collect();
        let times = parse_numbers(rest.iter().flat_map(|l| l.split_whitespace()), jobs * machines)?;
        Self::new(jobs, machines, times)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

impl Problem for Pfsp {
    fn size(&self) -> usize {
        self.jobs
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn evaluate(&self, permutation: &[usize]) -> Result<f64> {
        check_solution(permutation, self.jobs)?;
        // completion[m] = completion time of the previous job on machine m.
        let mut completion = vec![0.0f64; self.machines];
        let mut flow_time = 0.0;
        for &job in permutation {
            let mut prev_machine = 0.0f64;
            for (m, c) in completion.iter_mut().enumerate() {
                let start = c.max(prev_machine);
                *c = start + self.times[m * self.jobs + job];
                prev_machine = *c;
            }
            flow_time += prev_machine;
        }
        Ok(flow_time)
    }
}
