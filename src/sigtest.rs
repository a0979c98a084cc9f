//! Descriptive statistics and significance tests over plain score vectors.
//!
//! Degenerate inputs (empty samples, samples without any variance) never
//! produce an error; they yield `p = 1.0`, i.e. "not significant".

use crate::parallelism::{self, Partial};
use crate::shuffle;
use log::trace;
use std::f64::consts::SQRT_2;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Corrected sample standard deviation; `None` for fewer than two values.
pub fn sample_stdev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
    Some((ss / (xs.len() - 1) as f64).sqrt())
}

/// Mean and standard deviation used for z-scores; an undefined or zero
/// deviation is replaced by 1.
pub fn standardizer(xs: &[f64]) -> (f64, f64) {
    let sd = match sample_stdev(xs) {
        Some(sd) if sd > 0.0 => sd,
        _ => 1.0,
    };
    (mean(xs), sd)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alternative {
    /// The first sample tends to be smaller.
    Less,
    /// The first sample tends to be larger.
    Greater,
    TwoSided,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TestResult {
    pub statistic: f64,
    pub p_value: f64,
}

impl TestResult {
    fn degenerate() -> TestResult {
        TestResult {
            statistic: 0.0,
            p_value: 1.0,
        }
    }

    pub fn significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87
                                    + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 { r } else { 2.0 - r }
}

/// Upper tail of the standard normal distribution.
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / SQRT_2)
}

/// Average ranks (starting at 1) of `values`, and the tie term Σ(t³ - t).
fn ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut ties = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j + 1) as f64 / 2.0;
        for &k in &order[i..j] {
            ranks[k] = avg;
        }
        let t = (j - i) as f64;
        ties += t * t * t - t;
        i = j;
    }
    (ranks, ties)
}

/// Mann–Whitney U test, normal approximation with tie and continuity correction.
///
/// The reported statistic is U of the first sample.
pub fn mann_whitney_u(x: &[f64], y: &[f64], alternative: Alternative) -> TestResult {
    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    if x.is_empty() || y.is_empty() {
        return TestResult::degenerate();
    }
    let mut all = Vec::with_capacity(x.len() + y.len());
    all.extend_from_slice(x);
    all.extend_from_slice(y);
    let (r, ties) = ranks(&all);
    let r1: f64 = r[..x.len()].iter().sum();
    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;
    let u2 = n1 * n2 - u1;
    let n = n1 + n2;
    let var = n1 * n2 / 12.0 * ((n + 1.0) - ties / (n * (n - 1.0)));
    if var <= 0.0 {
        return TestResult {
            statistic: u1,
            p_value: 1.0,
        };
    }
    let (u, factor) = match alternative {
        Alternative::Greater => (u1, 1.0),
        Alternative::Less => (u2, 1.0),
        Alternative::TwoSided => (u1.max(u2), 2.0),
    };
    let z = (u - n1 * n2 / 2.0 - 0.5) / var.sqrt();
    let p = (factor * normal_sf(z)).clamp(0.0, 1.0);
    TestResult {
        statistic: u1,
        p_value: p,
    }
}

#[derive(Default)]
struct Exceedances {
    by_chance: u64,
}

impl Partial for Exceedances {
    fn merge(&mut self, other: Self) {
        self.by_chance += other.by_chance;
    }
}

/// Paired approximate randomisation test on per-segment scores.
///
/// Each trial swaps the two scores of every segment with probability 1/2;
/// `p = (exceedances + 1) / (trials + 1)` where an exceedance is a trial whose
/// absolute mean difference is at least the observed one.
pub fn approximate_randomization(a: &[f64], b: &[f64], trials: u64, seed: u64) -> TestResult {
    let n = a.len().min(b.len());
    if n == 0 {
        return TestResult::degenerate();
    }
    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let observed = (diffs.iter().sum::<f64>() / n as f64).abs();
    let diffs = &diffs;
    let (total, trials) = parallelism::run_trials(
        Exceedances::default,
        |job, trials_per_job, result: &mut Exceedances| {
            shuffle::flip_job(
                |flips, r: &mut Exceedances| {
                    let sum: f64 = diffs
                        .iter()
                        .zip(flips)
                        .map(|(&d, &f)| if f { -d } else { d })
                        .sum();
                    if (sum / n as f64).abs() + 1e-12 >= observed {
                        r.by_chance += 1;
                    }
                },
                n,
                seed,
                job,
                trials_per_job,
                result,
            )
        },
        trials,
    );
    trace!(target: "humeval", "randomization: {} of {trials} trials at least {observed:.4}", total.by_chance);
    TestResult {
        statistic: observed,
        p_value: (total.by_chance + 1) as f64 / (trials + 1) as f64,
    }
}
