//! Re-estimation of the diagonal tension between EM passes.
//!
//! The M-step for the tension solves `M(t) = E`, where `E` is the mean
//! posterior feature of the non-NULL links gathered during the pass and
//! `M(t)` is the mean feature the prior itself expects at tension `t`
//! (the average `d log Z / dt` over every aligned token). `M` is
//! non-decreasing in `t`, so the root is unique when it exists; otherwise
//! the result lands on a clamp bound.

use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagonal;
use crate::error::{AlignError, Result};
use crate::types::*;

// Step used when the Newton derivative is unusable.
const FALLBACK_RATE: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TensionSolver {
    /// Newton iterations on `M(t) - E` with a central-difference derivative.
    Newton { max_steps: usize, tolerance: f64 },
    /// Fixed-rate steps `t += rate * (E - M(t))`.
    Gradient { steps: usize, rate: f64 },
}

impl Default for TensionSolver {
    fn default() -> Self {
        TensionSolver::Newton {
            max_steps: 8,
            tolerance: 1e-4,
        }
    }
}

impl TensionSolver {
    pub fn classic() -> Self {
        TensionSolver::Gradient {
            steps: 8,
            rate: 20.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            TensionSolver::Newton {
                max_steps,
                tolerance,
            } => {
                if max_steps == 0 || !(tolerance > 0.0 && tolerance.is_finite()) {
                    return Err(AlignError::config(format!(
                        "newton solver needs max_steps > 0 and tolerance > 0, got {max_steps}, {tolerance}"
                    )));
                }
            }
            TensionSolver::Gradient { steps, rate } => {
                if steps == 0 || !(rate > 0.0 && rate.is_finite()) {
                    return Err(AlignError::config(format!(
                        "gradient solver needs steps > 0 and rate > 0, got {steps}, {rate}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Solves for the tension matching the empirical mean feature. The result
    /// is clamped to `[TENSION_MIN, TENSION_MAX]`; non-finite inputs propagate
    /// and are the caller's to reject.
    pub fn solve(&self, current: f64, empirical: f64, lengths: &LengthStats) -> f64 {
        match *self {
            TensionSolver::Gradient { steps, rate } => {
                let mut t = current;
                for step in 0..steps {
                    let residual = empirical - lengths.expected_feature(t);
                    t = (t + rate * residual).clamp(TENSION_MIN, TENSION_MAX);
                    debug!(step, tension = t, residual, "gradient step");
                }
                t
            }
            TensionSolver::Newton {
                max_steps,
                tolerance,
            } => {
                let g = |t: f64| lengths.expected_feature(t) - empirical;
                let mut t = current.clamp(TENSION_MIN, TENSION_MAX);
                for step in 0..max_steps {
                    let residual = g(t);
                    let h = 1e-4 * (1.0 + t);
                    let lo = (t - h).max(0.0);
                    let hi = t + h;
                    let slope = (g(hi) - g(lo)) / (hi - lo);
                    let next = if slope.is_finite() && slope > 1e-12 {
                        t - residual / slope
                    } else {
                        t - FALLBACK_RATE * residual
                    };
                    let next = next.clamp(TENSION_MIN, TENSION_MAX);
                    debug!(step, tension = next, residual, slope, "newton step");
                    let done = (next - t).abs() < tolerance;
                    t = next;
                    if done {
                        break;
                    }
                }
                t
            }
        }
    }
}

/// How often each (aligned length, candidate length) combination occurs.
/// Pairs with an empty side never contribute to the tension.
#[derive(Clone, Debug, Default)]
pub struct LengthStats {
    classes: Vec<(usize, usize, u64)>,
    tokens: u64,
}

impl LengthStats {
    pub fn from_corpus(corpus: &[SentencePair], reverse: bool) -> Self {
        let counts = corpus
            .par_iter()
            .fold(HashMap::new, |mut acc: HashMap<(usize, usize), u64>, pair| {
                let (aligned, candidates) = pair.oriented(reverse);
                if !aligned.is_empty() && !candidates.is_empty() {
                    *acc.entry((aligned.len(), candidates.len())).or_insert(0) += 1;
                }
                acc
            })
            .reduce(HashMap::new, |mut acc, local| {
                for (k, c) in local {
                    *acc.entry(k).or_insert(0) += c;
                }
                acc
            });
        Self::from_counts(counts)
    }

    fn from_counts(counts: HashMap<(usize, usize), u64>) -> Self {
        let mut classes: Vec<(usize, usize, u64)> =
            counts.into_iter().map(|((m, n), c)| (m, n, c)).collect();
        classes.sort_unstable();
        let tokens = classes.iter().map(|&(m, _, c)| m as u64 * c).sum();
        LengthStats { classes, tokens }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens == 0
    }

    /// Mean prior feature per aligned token at `tension`.
    pub fn expected_feature(&self, tension: f64) -> f64 {
        if self.tokens == 0 {
            return 0.0;
        }
        let total: f64 = self
            .classes
            .par_iter()
            .map(|&(m, n, c)| {
                let per_sentence: f64 = (1..=m)
                    .map(|i| diagonal::expected_feature(i, m, n, tension))
                    .sum();
                c as f64 * per_sentence
            })
            .sum();
        total / self.tokens as f64
    }
}
