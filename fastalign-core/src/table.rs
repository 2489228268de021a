//! Sparse translation table `p(f | e)` with a concurrent count accumulator.
//!
//! Entries are spread over a power-of-two number of shards by a hash of the
//! `(e, f)` pair. Each shard keeps its probabilities in a plain map and its
//! pending counts behind its own mutex:
//!
//! - [`ProbabilityTable::get`] and [`ProbabilityTable::increment`] take
//!   `&self`, so any number of E-step workers can share the table. Readers
//!   never lock; writers only contend when they hash to the same shard.
//! - [`ProbabilityTable::normalize`] takes `&mut self`. It cannot run until
//!   every worker borrow has ended, which is exactly the end-of-pass barrier.

use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;
use rayon::prelude::*;

use crate::types::*;

type Key = (Token, Token);

#[derive(Debug, Default)]
struct Shard {
    probs: HashMap<Key, Prob>,
    counts: Mutex<HashMap<Key, Prob>>,
}

#[derive(Debug)]
pub struct ProbabilityTable {
    shards: Box<[Shard]>,
    mask: usize,
}

impl Default for ProbabilityTable {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProbabilityTable {
    pub fn new(shards: usize) -> Self {
        let n = shards.max(1).next_power_of_two();
        ProbabilityTable {
            shards: (0..n).map(|_| Shard::default()).collect(),
            mask: n - 1,
        }
    }

    pub fn from_entries<I>(shards: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = (Token, Token, Prob)>,
    {
        let mut table = Self::new(shards);
        for (e, f, p) in entries {
            let idx = shard_index(e, f, table.mask);
            table.shards[idx].probs.insert((e, f), p);
        }
        table
    }

    #[inline]
    fn shard(&self, e: Token, f: Token) -> &Shard {
        &self.shards[shard_index(e, f, self.mask)]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// `p(f | e)`, or [`NULL_PROBABILITY`] for a pair never stored.
    #[inline]
    pub fn get(&self, e: Token, f: Token) -> Prob {
        self.shard(e, f)
            .probs
            .get(&(e, f))
            .copied()
            .unwrap_or(NULL_PROBABILITY)
    }

    /// Adds a fractional count for `(e, f)` to the current pass.
    #[inline]
    pub fn increment(&self, e: Token, f: Token, amount: Prob) {
        let mut counts = self
            .shard(e, f)
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *counts.entry((e, f)).or_insert(0.0) += amount;
    }

    /// Number of stored probabilities.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.probs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct keys with counts pending normalization.
    pub fn pending(&mut self) -> usize {
        self.shards
            .iter_mut()
            .map(|s| s.counts.get_mut().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Drops every pending count without touching the probabilities.
    pub fn discard_counts(&mut self) {
        for shard in self.shards.iter_mut() {
            shard
                .counts
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Maximum-likelihood normalization: `p(f | e) = c(e, f) / sum_f' c(e, f')`.
    /// Returns the number of rows (distinct `e`) that were replaced.
    pub fn normalize(&mut self) -> usize {
        self.normalize_with(None)
    }

    /// Variational-Bayes normalization under a symmetric Dirichlet prior `alpha`:
    /// `p(f | e) = exp(psi(c(e, f) + alpha) - psi(sum_f' c(e, f') + k alpha))`,
    /// `k` the number of counted `f` for that `e`.
    pub fn normalize_vb(&mut self, alpha: f64) -> usize {
        self.normalize_with(Some(alpha))
    }

    // Rows of an `e` that received no positive count this pass keep their
    // previous probabilities. All pending counts are cleared.
    fn normalize_with(&mut self, alpha: Option<f64>) -> usize {
        let partials: Vec<HashMap<Token, (Prob, usize)>> = self
            .shards
            .par_iter_mut()
            .map(|shard| {
                let counts = shard.counts.get_mut().unwrap_or_else(PoisonError::into_inner);
                let mut local: HashMap<Token, (Prob, usize)> = HashMap::new();
                for (&(e, _), &c) in counts.iter() {
                    let t = local.entry(e).or_insert((0.0, 0));
                    t.0 += c;
                    t.1 += 1;
                }
                local
            })
            .collect();

        // Merge in shard order so totals do not depend on scheduling.
        let mut totals: HashMap<Token, (Prob, usize)> = HashMap::new();
        for local in partials {
            for (e, (c, k)) in local {
                let t = totals.entry(e).or_insert((0.0, 0));
                t.0 += c;
                t.1 += k;
            }
        }
        totals.retain(|_, (total, _)| *total > 0.0);

        let totals = &totals;
        self.shards.par_iter_mut().for_each(|shard| {
            let counts = shard.counts.get_mut().unwrap_or_else(PoisonError::into_inner);
            shard.probs.retain(|(e, _), _| !totals.contains_key(e));
            for ((e, f), c) in counts.drain() {
                let Some(&(total, k)) = totals.get(&e) else {
                    continue;
                };
                let p = match alpha {
                    None => c / total,
                    Some(a) => (digamma(c + a) - digamma(total + k as f64 * a)).exp(),
                };
                // Underflowed mass reads back as the floor instead of zero.
                if p > 0.0 && p.is_finite() {
                    shard.probs.insert((e, f), p.min(1.0));
                }
            }
        });
        totals.len()
    }

    /// Removes stored probabilities below `threshold`; returns how many went.
    pub fn prune(&mut self, threshold: Prob) -> usize {
        self.shards
            .par_iter_mut()
            .map(|shard| {
                let before = shard.probs.len();
                shard.probs.retain(|_, p| *p >= threshold);
                before - shard.probs.len()
            })
            .sum()
    }

    /// All stored entries, sorted by `(e, f)`.
    pub fn entries(&self) -> Vec<(Token, Token, Prob)> {
        let mut out: Vec<(Token, Token, Prob)> = self
            .shards
            .iter()
            .flat_map(|s| s.probs.iter().map(|(&(e, f), &p)| (e, f, p)))
            .collect();
        out.par_sort_unstable_by_key(|&(e, f, _)| (e, f));
        out
    }
}

/// Digamma function, recurrence up to x >= 6 then the asymptotic series.
fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}
