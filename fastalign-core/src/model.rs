//! Directional alignment model: translation table + diagonal prior.
//!
//! One struct covers both directions. For the forward model every source
//! position is *aligned* and chooses a target position (the *candidates*) or
//! NULL; the reverse model swaps the roles. The table is keyed by
//! `(candidate word, aligned word)`, i.e. it holds `p(aligned | candidate)`
//! with NULL as the candidate word of the empty position.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ModelConfig;
use crate::diagonal::{self, AlignmentScorer};
use crate::error::{AlignError, Result};
use crate::table::ProbabilityTable;
use crate::types::*;

const MODEL_MAGIC: u32 = 0x4641_4c4e;
const MODEL_VERSION: u32 = 1;
const DEFAULT_SHARDS: usize = 256;

/// Links of one sentence pair: one slot per aligned position holding the
/// chosen candidate position or [`NULL_LINK`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alignment {
    links: Vec<Link>,
    reverse: bool,
}

impl Alignment {
    pub fn new(links: Vec<Link>, reverse: bool) -> Self {
        Alignment { links, reverse }
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Number of aligned positions (linked or NULL).
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Candidate chosen by aligned position `k`, `None` for NULL.
    pub fn link(&self, k: usize) -> Option<usize> {
        match self.links.get(k) {
            Some(&l) if l != NULL_LINK => Some(l as usize),
            _ => None,
        }
    }

    /// Non-NULL links as sorted `(source position, target position)` pairs.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = self
            .links
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l != NULL_LINK)
            .map(|(k, &l)| if self.reverse { (l as usize, k) } else { (k, l as usize) })
            .collect();
        out.sort_unstable();
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Training { pass: usize },
    Frozen,
}

/// Sufficient statistics of one expectation step, summed over workers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PassStats {
    pub pairs: usize,
    /// Aligned tokens seen.
    pub tokens: u64,
    pub log_likelihood: f64,
    /// Posterior-weighted diagonal feature over non-NULL links.
    pub feature: f64,
    /// Posterior mass on non-NULL links.
    pub non_null: f64,
}

impl PassStats {
    pub fn merge(self, other: PassStats) -> PassStats {
        PassStats {
            pairs: self.pairs + other.pairs,
            tokens: self.tokens + other.tokens,
            log_likelihood: self.log_likelihood + other.log_likelihood,
            feature: self.feature + other.feature,
            non_null: self.non_null + other.non_null,
        }
    }

    /// Mean feature of non-NULL links; `None` without any non-NULL mass.
    pub fn empirical_feature(&self) -> Option<f64> {
        (self.non_null > 0.0).then(|| self.feature / self.non_null)
    }
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    magic: u32,
    version: u32,
    config: ModelConfig,
    tension: f64,
    entries: Vec<(Token, Token, Prob)>,
}

#[derive(Debug)]
pub struct Model {
    config: ModelConfig,
    tension: f64,
    table: ProbabilityTable,
    phase: Phase,
}

impl Model {
    pub fn new(config: ModelConfig) -> Result<Self> {
        Self::with_shards(config, DEFAULT_SHARDS)
    }

    pub fn with_shards(config: ModelConfig, shards: usize) -> Result<Self> {
        config.validate()?;
        Ok(Model {
            config,
            tension: config.diagonal_tension,
            table: ProbabilityTable::new(shards),
            phase: Phase::Uninitialized,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_reverse(&self) -> bool {
        self.config.reverse
    }

    pub fn tension(&self) -> f64 {
        self.tension
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn table(&self) -> &ProbabilityTable {
        &self.table
    }

    /// Prior snapshot at the current tension.
    pub fn scorer(&self) -> AlignmentScorer {
        AlignmentScorer::new(&self.config, self.tension)
    }

    /// `p(f | e)` with `e` a candidate-side word or NULL.
    #[inline]
    pub fn probability(&self, e: Token, f: Token) -> Prob {
        self.table.get(e, f)
    }

    #[inline]
    pub fn increment_probability(&self, e: Token, f: Token, amount: Prob) -> Result<()> {
        self.ensure_mutable("increment")?;
        self.table.increment(e, f, amount);
        Ok(())
    }

    fn ensure_mutable(&self, op: &'static str) -> Result<()> {
        if self.phase == Phase::Frozen {
            Err(AlignError::Frozen(op))
        } else {
            Ok(())
        }
    }

    pub fn begin_pass(&mut self, pass: usize) -> Result<()> {
        self.ensure_mutable("begin_pass")?;
        self.phase = Phase::Training { pass };
        Ok(())
    }

    /// Turns this pass's counts into probabilities. `alpha` selects
    /// variational-Bayes normalization.
    pub fn normalize(&mut self, alpha: Option<f64>) -> Result<usize> {
        self.ensure_mutable("normalize")?;
        Ok(match alpha {
            Some(a) => self.table.normalize_vb(a),
            None => self.table.normalize(),
        })
    }

    /// Throws away the counts of an unfinished pass.
    pub fn discard_pass(&mut self) {
        self.table.discard_counts();
    }

    pub fn set_tension(&mut self, tension: f64) -> Result<()> {
        self.ensure_mutable("set_tension")?;
        if !tension.is_finite() || tension < 0.0 {
            return Err(AlignError::config(format!("invalid tension {tension}")));
        }
        self.tension = tension;
        Ok(())
    }

    pub fn prune(&mut self, threshold: Prob) -> Result<usize> {
        self.ensure_mutable("prune")?;
        Ok(self.table.prune(threshold))
    }

    pub fn freeze(&mut self) {
        self.phase = Phase::Frozen;
    }

    /// Fills `out[j]` with prior x translation score of candidate `j` for the
    /// aligned word `f` at 1-based position `i`; returns the NULL score.
    #[inline]
    fn score_position(
        &self,
        scorer: &AlignmentScorer,
        f: Token,
        i: usize,
        m: usize,
        candidates: &[Token],
        out: &mut [Prob],
    ) -> Prob {
        let w = scorer.position(i, m, candidates.len());
        for (j, (&e, slot)) in candidates.iter().zip(out.iter_mut()).enumerate() {
            *slot = w.weight(j + 1) * self.table.get(e, f);
        }
        if w.null() > 0.0 {
            w.null() * self.table.get(NULL_TOKEN, f)
        } else {
            0.0
        }
    }

    fn viterbi(
        &self,
        source: &[Token],
        target: &[Token],
        scorer: &AlignmentScorer,
        buf: &mut Vec<Prob>,
    ) -> Alignment {
        let (aligned, candidates) = if self.config.reverse {
            (target, source)
        } else {
            (source, target)
        };
        let m = aligned.len();
        buf.clear();
        buf.resize(candidates.len(), 0.0);
        let links = aligned
            .iter()
            .enumerate()
            .map(|(i, &f)| {
                let null = self.score_position(scorer, f, i + 1, m, candidates, buf);
                // NULL first, then strictly better candidates: ties keep the earlier option.
                let mut best = NULL_LINK;
                let mut best_score = null;
                for (j, &p) in buf.iter().enumerate() {
                    if p > best_score {
                        best = j as Link;
                        best_score = p;
                    }
                }
                best
            })
            .collect();
        Alignment::new(links, self.config.reverse)
    }

    /// Viterbi alignment of one pair.
    pub fn compute_alignment(&self, source: &[Token], target: &[Token]) -> Alignment {
        let mut buf = Vec::new();
        self.viterbi(source, target, &self.scorer(), &mut buf)
    }

    /// Viterbi alignments of a batch, computed in parallel; output order
    /// matches the input.
    pub fn compute_alignments(&self, batch: &[SentencePair]) -> Vec<Alignment> {
        let scorer = self.scorer();
        batch
            .par_iter()
            .map_init(Vec::new, |buf, pair| {
                self.viterbi(&pair.source, &pair.target, &scorer, buf)
            })
            .collect()
    }

    /// Log-likelihood of the aligned side given the candidate side.
    pub fn score(&self, source: &[Token], target: &[Token]) -> f64 {
        let (aligned, candidates) = if self.config.reverse {
            (target, source)
        } else {
            (source, target)
        };
        let scorer = self.scorer();
        let mut buf = vec![0.0; candidates.len()];
        let m = aligned.len();
        aligned
            .iter()
            .enumerate()
            .map(|(i, &f)| {
                let null = self.score_position(&scorer, f, i + 1, m, candidates, &mut buf);
                (null + buf.iter().sum::<Prob>()).ln()
            })
            .sum()
    }

    /// Expectation step for one pair: adds every link's posterior to the
    /// table's counts and returns the pair's statistics.
    pub fn expectation(
        &self,
        pair: &SentencePair,
        scorer: &AlignmentScorer,
        buf: &mut Vec<Prob>,
    ) -> Result<PassStats> {
        self.ensure_mutable("expectation")?;
        let (aligned, candidates) = pair.oriented(self.config.reverse);
        let m = aligned.len();
        let n = candidates.len();
        buf.clear();
        buf.resize(n, 0.0);

        let mut stats = PassStats {
            pairs: 1,
            ..PassStats::default()
        };
        for (i, &f) in aligned.iter().enumerate() {
            let null = self.score_position(scorer, f, i + 1, m, candidates, buf);
            let sum = null + buf.iter().sum::<Prob>();
            stats.tokens += 1;
            if !(sum > 0.0 && sum.is_finite()) {
                warn!(position = i, word = f, sum, "skipping token with no usable posterior");
                continue;
            }
            stats.log_likelihood += sum.ln();
            if null > 0.0 {
                self.table.increment(NULL_TOKEN, f, null / sum);
            }
            for (j, (&e, &p)) in candidates.iter().zip(buf.iter()).enumerate() {
                let posterior = p / sum;
                self.table.increment(e, f, posterior);
                stats.non_null += posterior;
                stats.feature += posterior * diagonal::feature(i + 1, j + 1, m, n);
            }
        }
        Ok(stats)
    }

    /// Expectation step over one worker's shard of the corpus.
    pub fn expectation_batch(
        &self,
        shard: &[SentencePair],
        scorer: &AlignmentScorer,
    ) -> Result<PassStats> {
        let mut buf = Vec::new();
        shard.iter().try_fold(PassStats::default(), |acc, pair| {
            Ok(acc.merge(self.expectation(pair, scorer, &mut buf)?))
        })
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        let file = ModelFile {
            magic: MODEL_MAGIC,
            version: MODEL_VERSION,
            config: self.config,
            tension: self.tension,
            entries: self.table.entries(),
        };
        bincode::serialize_into(writer, &file)?;
        Ok(())
    }

    /// Reads a model written by [`Model::save`]. The result is frozen.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let file: ModelFile = bincode::deserialize_from(reader)?;
        if file.magic != MODEL_MAGIC || file.version != MODEL_VERSION {
            return Err(AlignError::UnsupportedVersion {
                magic: file.magic,
                version: file.version,
            });
        }
        file.config.validate()?;
        if !file.tension.is_finite() || file.tension < 0.0 {
            return Err(AlignError::config(format!("stored tension {} is invalid", file.tension)));
        }
        Ok(Model {
            config: file.config,
            tension: file.tension,
            table: ProbabilityTable::from_entries(DEFAULT_SHARDS, file.entries),
            phase: Phase::Frozen,
        })
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(BufReader::new(File::open(path)?))
    }
}
