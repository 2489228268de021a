//! Diagonal-favoring alignment prior.
//!
//! An aligned position `i` of a sentence of length `m` prefers candidate
//! positions `j` (of `n`) near the diagonal `i/m == j/n`:
//!
//! ```text
//! p(j | i, m, n) = (1 - p0) * exp(tension * h(i, j, m, n)) / Z(i, m, n)
//! h(i, j, m, n)  = -|i/m - j/n|
//! ```
//!
//! Positions are 1-based throughout this module. `Z` and its derivative with
//! respect to the tension are sums of (arithmetico-)geometric series on both
//! sides of the diagonal, so neither needs a loop over `j`.

use crate::config::ModelConfig;
use crate::types::Prob;

// Below this per-step decay the derivative series is summed directly.
const SERIES_DIRECT_SUM: f64 = 1e-3;

#[inline]
pub fn feature(i: usize, j: usize, m: usize, n: usize) -> f64 {
    -((i as f64) / (m as f64) - (j as f64) / (n as f64)).abs()
}

/// `sum_{t < k} exp(-x t)`, stable as `x -> 0`.
#[inline]
fn geometric_sum(x: f64, k: usize) -> f64 {
    if x == 0.0 {
        k as f64
    } else {
        (-(k as f64) * x).exp_m1() / (-x).exp_m1()
    }
}

/// `g1 * sum_{t < k} (a1 + t d) exp(-x t)`.
fn arithmetico_geometric_sum(a1: f64, g1: f64, x: f64, d: f64, k: usize) -> f64 {
    if x < SERIES_DIRECT_SUM {
        let mut s = 0.0;
        for t in 0..k {
            s += (a1 + t as f64 * d) * (-(t as f64) * x).exp();
        }
        return g1 * s;
    }
    let r = (-x).exp();
    let kf = k as f64;
    let rm1 = 1.0 - r;
    let weighted = r * (1.0 - kf * r.powi(k as i32 - 1) + (kf - 1.0) * r.powi(k as i32)) / (rm1 * rm1);
    g1 * (a1 * geometric_sum(x, k) + d * weighted)
}

/// Feature of the candidate nearest the diagonal, the largest term of `Z`.
fn peak_feature(i: usize, m: usize, n: usize) -> f64 {
    let floor = i * n / m;
    let mut peak = f64::NEG_INFINITY;
    if floor < n {
        peak = feature(i, floor + 1, m, n);
    }
    if floor > 0 {
        peak = peak.max(feature(i, floor, m, n));
    }
    peak
}

/// `Z * exp(-tension * peak)`, at least 1 for any tension.
fn shifted_partition(i: usize, m: usize, n: usize, tension: f64, peak: f64) -> f64 {
    let floor = i * n / m;
    let ceil = floor + 1;
    let x = tension / n as f64;
    let num_top = n - floor;
    let mut z = 0.0;
    if num_top > 0 {
        z += (tension * (feature(i, ceil, m, n) - peak)).exp() * geometric_sum(x, num_top);
    }
    if floor > 0 {
        z += (tension * (feature(i, floor, m, n) - peak)).exp() * geometric_sum(x, floor);
    }
    z
}

/// Partition `Z(i, m, n) = sum_{j=1..n} exp(tension * h(i, j, m, n))`.
pub fn partition(i: usize, m: usize, n: usize, tension: f64) -> f64 {
    debug_assert!(i >= 1 && i <= m && n > 0);
    let peak = peak_feature(i, m, n);
    (tension * peak).exp() * shifted_partition(i, m, n, tension, peak)
}

/// `d log Z / d tension`: the expected feature of position `i` under the prior.
pub fn expected_feature(i: usize, m: usize, n: usize, tension: f64) -> f64 {
    debug_assert!(i >= 1 && i <= m && n > 0);
    let floor = i * n / m;
    let ceil = floor + 1;
    let x = tension / n as f64;
    let d = -1.0 / n as f64;
    let num_top = n - floor;
    let peak = peak_feature(i, m, n);
    let mut s = 0.0;
    if num_top > 0 {
        let h = feature(i, ceil, m, n);
        s += arithmetico_geometric_sum(h, (tension * (h - peak)).exp(), x, d, num_top);
    }
    if floor > 0 {
        let h = feature(i, floor, m, n);
        s += arithmetico_geometric_sum(h, (tension * (h - peak)).exp(), x, d, floor);
    }
    s / shifted_partition(i, m, n, tension, peak)
}

/// Alignment prior for one model at one tension value. Copied into every
/// worker at pass start, so the tension cannot change under a running pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlignmentScorer {
    tension: f64,
    use_null: bool,
    favor_diagonal: bool,
    prob_align_null: Prob,
}

impl AlignmentScorer {
    pub fn new(config: &ModelConfig, tension: f64) -> Self {
        AlignmentScorer {
            tension,
            use_null: config.use_null,
            favor_diagonal: config.favor_diagonal,
            prob_align_null: config.prob_align_null,
        }
    }

    #[inline]
    pub fn tension(&self) -> f64 {
        self.tension
    }

    /// Prior weights for aligned position `i` (1-based) of `m` over `n` candidates.
    /// The partition is computed here once and shared by every `j`.
    #[inline]
    pub fn position(&self, i: usize, m: usize, n: usize) -> PositionWeights {
        if n == 0 {
            return PositionWeights {
                i,
                m,
                n,
                tension: self.tension,
                peak: 0.0,
                null: 1.0,
                scale: 0.0,
                diagonal: false,
            };
        }
        let (null, not_null) = if self.use_null {
            (self.prob_align_null, 1.0 - self.prob_align_null)
        } else {
            (0.0, 1.0)
        };
        let (peak, scale) = if self.favor_diagonal {
            let peak = peak_feature(i, m, n);
            (peak, not_null / shifted_partition(i, m, n, self.tension, peak))
        } else {
            (0.0, not_null / n as f64)
        };
        PositionWeights {
            i,
            m,
            n,
            tension: self.tension,
            peak,
            null,
            scale,
            diagonal: self.favor_diagonal,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PositionWeights {
    i: usize,
    m: usize,
    n: usize,
    tension: f64,
    peak: f64,
    null: Prob,
    scale: f64,
    diagonal: bool,
}

impl PositionWeights {
    #[inline]
    pub fn null(&self) -> Prob {
        self.null
    }

    /// Weight of candidate `j` (1-based).
    #[inline]
    pub fn weight(&self, j: usize) -> Prob {
        if self.diagonal {
            let h = feature(self.i, j, self.m, self.n);
            self.scale * (self.tension * (h - self.peak)).exp()
        } else {
            self.scale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unnormalized(i: usize, j: usize, m: usize, n: usize, t: f64) -> f64 {
        (t * feature(i, j, m, n)).exp()
    }

    fn brute_partition(i: usize, m: usize, n: usize, t: f64) -> f64 {
        (1..=n).map(|j| unnormalized(i, j, m, n, t)).sum()
    }

    fn brute_expected(i: usize, m: usize, n: usize, t: f64) -> f64 {
        let z = brute_partition(i, m, n, t);
        (1..=n)
            .map(|j| feature(i, j, m, n) * unnormalized(i, j, m, n, t))
            .sum::<f64>()
            / z
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn closed_forms_match_brute_force() {
        for &(m, n) in &[(1, 1), (3, 3), (5, 2), (2, 7), (13, 17), (40, 31)] {
            for &t in &[0.0, 1e-6, 0.01, 0.5, 4.0, 14.0] {
                for i in 1..=m {
                    let z = partition(i, m, n, t);
                    let zb = brute_partition(i, m, n, t);
                    assert!(close(z, zb, 1e-9), "Z m={m} n={n} i={i} t={t}: {z} vs {zb}");
                    let e = expected_feature(i, m, n, t);
                    let eb = brute_expected(i, m, n, t);
                    assert!(close(e, eb, 1e-7), "dlogZ m={m} n={n} i={i} t={t}: {e} vs {eb}");
                }
            }
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let cfgs = [
            ModelConfig::default(),
            ModelConfig { use_null: false, ..ModelConfig::default() },
            ModelConfig { favor_diagonal: false, ..ModelConfig::default() },
        ];
        for cfg in cfgs.iter() {
            let scorer = AlignmentScorer::new(cfg, 4.0);
            for i in 1..=6 {
                let w = scorer.position(i, 6, 9);
                let total = w.null() + (1..=9).map(|j| w.weight(j)).sum::<f64>();
                assert!(close(total, 1.0, 1e-12), "{cfg:?} i={i}: {total}");
            }
        }
    }

    #[test]
    fn zero_tension_is_position_independent() {
        let scorer = AlignmentScorer::new(&ModelConfig::default(), 0.0);
        let expected = (1.0 - ModelConfig::default().prob_align_null) / 5.0;
        for i in 1..=4 {
            let w = scorer.position(i, 4, 5);
            for j in 1..=5 {
                assert!(close(w.weight(j), expected, 1e-12));
            }
        }
    }

    #[test]
    fn tension_prefers_the_diagonal() {
        let scorer = AlignmentScorer::new(&ModelConfig::default(), 4.0);
        let w = scorer.position(2, 4, 4);
        assert!(w.weight(2) > w.weight(1));
        assert!(w.weight(2) > w.weight(3));
        assert!(w.weight(3) > w.weight(4));
    }

    #[test]
    fn steep_tension_stays_normalized() {
        let cfg = ModelConfig::default();
        let not_null = 1.0 - cfg.prob_align_null;
        for &t in &[800.0, 5000.0] {
            let scorer = AlignmentScorer::new(&cfg, t);
            for i in [1, 2, 500, 999, 1000] {
                let w = scorer.position(i, 1000, 1);
                assert!(close(w.weight(1), not_null, 1e-12), "t={t} i={i}: {}", w.weight(1));
                assert!(expected_feature(i, 1000, 1, t).is_finite());
            }
            for &(m, n) in &[(40, 31), (7, 300)] {
                for i in 1..=m {
                    let w = scorer.position(i, m, n);
                    let weights: Vec<f64> = (1..=n).map(|j| w.weight(j)).collect();
                    assert!(weights.iter().all(|x| x.is_finite() && *x >= 0.0));
                    let total = w.null() + weights.iter().sum::<f64>();
                    assert!(close(total, 1.0, 1e-12), "t={t} m={m} n={n} i={i}: {total}");

                    // Log-space reference: softmax over tension * h.
                    let logits: Vec<f64> = (1..=n).map(|j| t * feature(i, j, m, n)).collect();
                    let top = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let z: f64 = logits.iter().map(|l| (l - top).exp()).sum();
                    for (j, l) in logits.iter().enumerate() {
                        let reference = not_null * (l - top).exp() / z;
                        assert!(close(weights[j], reference, 1e-9), "t={t} m={m} n={n} i={i} j={j}");
                    }
                    let e = expected_feature(i, m, n, t);
                    let eb = logits.iter().map(|l| (l / t) * (l - top).exp()).sum::<f64>() / z;
                    assert!(close(e, eb, 1e-7), "dlogZ t={t} m={m} n={n} i={i}: {e} vs {eb}");
                }
            }
        }
    }

    #[test]
    fn empty_candidates_force_null() {
        for use_null in [true, false] {
            let cfg = ModelConfig { use_null, ..ModelConfig::default() };
            let w = AlignmentScorer::new(&cfg, 4.0).position(1, 3, 0);
            assert_eq!(w.null(), 1.0);
        }
    }
}
