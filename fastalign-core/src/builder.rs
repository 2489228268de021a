//! EM training driver.
//!
//! Each pass runs the expectation step on a dedicated rayon pool, one chunk
//! of the corpus per task, all tasks incrementing the shared table. The
//! coordinator (the caller of [`Builder::build`]) then normalizes the counts
//! and re-estimates the diagonal tension before the next pass starts.
//!
//! Where threads cannot be spawned (`wasm32-unknown-unknown`) training runs
//! on the calling thread instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::config::{ModelConfig, TrainingConfig};
use crate::error::{AlignError, Result};
use crate::model::{Model, PassStats};
use crate::tension::LengthStats;
use crate::types::SentencePair;

// Corpus chunks handed out per worker thread in each pass.
const CHUNKS_PER_THREAD: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassSummary {
    pub pass: usize,
    /// Log-likelihood of the corpus under the parameters the pass started with.
    pub log_likelihood: f64,
    pub tokens: u64,
    /// Tension after this pass's re-estimation.
    pub tension: f64,
    /// Table rows replaced by normalization.
    pub rows: usize,
    pub seconds: f64,
}

impl PassSummary {
    /// Per-token cross entropy in bits.
    pub fn cross_entropy(&self) -> f64 {
        if self.tokens == 0 {
            0.0
        } else {
            -self.log_likelihood / std::f64::consts::LN_2 / self.tokens as f64
        }
    }

    pub fn perplexity(&self) -> f64 {
        self.cross_entropy().exp2()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrainingReport {
    pub passes: Vec<PassSummary>,
    pub converged: bool,
    pub pruned: usize,
}

enum Workers {
    Pool(rayon::ThreadPool),
    CurrentThread,
}

impl Workers {
    fn new(threads: usize) -> Result<Self> {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fastalign-worker-{i}"))
            .build();
        match built {
            Ok(pool) => Ok(Workers::Pool(pool)),
            Err(err)
                if std::error::Error::source(&err)
                    .and_then(|e| e.downcast_ref::<std::io::Error>())
                    .is_some_and(|e| e.kind() == std::io::ErrorKind::Unsupported) => {
                debug!(threads, "threads unsupported; training on the calling thread");
                Ok(Workers::CurrentThread)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn threads(&self) -> usize {
        match self {
            Workers::Pool(pool) => pool.current_num_threads(),
            Workers::CurrentThread => 1,
        }
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match self {
            Workers::Pool(pool) => pool.install(f),
            Workers::CurrentThread => f(),
        }
    }

    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        match self {
            Workers::Pool(pool) => pool.join(a, b),
            Workers::CurrentThread => (a(), b()),
        }
    }
}

// `Instant::now` panics on wasm32-unknown-unknown.
fn start_clock() -> Option<Instant> {
    if cfg!(target_arch = "wasm32") {
        None
    } else {
        Some(Instant::now())
    }
}

pub struct Builder {
    model_config: ModelConfig,
    training: TrainingConfig,
    workers: Workers,
    cancel: Option<Arc<AtomicBool>>,
}

impl Builder {
    pub fn new(model_config: ModelConfig, training: TrainingConfig) -> Result<Self> {
        model_config.validate()?;
        training.validate()?;
        let workers = Workers::new(training.worker_threads())?;
        Ok(Builder {
            model_config,
            training,
            workers,
            cancel: None,
        })
    }

    /// Training checks `flag` between passes and stops with
    /// [`AlignError::Cancelled`] once it is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn threads(&self) -> usize {
        self.workers.threads()
    }

    pub fn build(&self, corpus: &[SentencePair]) -> Result<Model> {
        self.build_with_report(corpus).map(|(model, _)| model)
    }

    pub fn build_with_report(&self, corpus: &[SentencePair]) -> Result<(Model, TrainingReport)> {
        self.train(self.model_config, corpus)
    }

    /// Trains a forward and a reverse model over the same corpus, concurrently.
    pub fn build_bidirectional(&self, corpus: &[SentencePair]) -> Result<(Model, Model)> {
        let forward = ModelConfig {
            reverse: false,
            ..self.model_config
        };
        let (fwd, rev) = self.workers.join(
            || self.train(forward, corpus),
            || self.train(forward.reversed(), corpus),
        );
        Ok((fwd?.0, rev?.0))
    }

    /// Runs `f` on this builder's worker pool.
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.workers.install(f)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn train(&self, config: ModelConfig, corpus: &[SentencePair]) -> Result<(Model, TrainingReport)> {
        let direction = if config.reverse { "reverse" } else { "forward" };
        let _span = info_span!("train", direction).entered();
        if corpus.is_empty() {
            return Err(AlignError::corpus(0, "corpus is empty"));
        }

        let mut model = Model::with_shards(config, self.training.shards)?;
        let lengths = self.workers.install(|| LengthStats::from_corpus(corpus, config.reverse));
        let chunk = (corpus.len() / (self.threads() * CHUNKS_PER_THREAD)).max(1);
        info!(
            pairs = corpus.len(),
            tokens = lengths.tokens(),
            threads = self.threads(),
            iterations = self.training.iterations,
            "training started"
        );

        let mut report = TrainingReport::default();
        let mut previous: Option<f64> = None;
        for pass in 1..=self.training.iterations {
            if self.cancelled() {
                return Err(AlignError::Cancelled {
                    completed_passes: pass - 1,
                });
            }
            model.begin_pass(pass)?;
            let started = start_clock();
            let scorer = model.scorer();

            let stats = self.workers.install(|| {
                corpus
                    .par_chunks(chunk)
                    .map(|shard| model.expectation_batch(shard, &scorer))
                    .try_reduce(PassStats::default, |a, b| Ok(a.merge(b)))
            })?;

            if self.cancelled() {
                model.discard_pass();
                return Err(AlignError::Cancelled {
                    completed_passes: pass - 1,
                });
            }

            let alpha = self.training.variational_bayes;
            let rows = self.workers.install(|| model.normalize(alpha))?;
            if config.favor_diagonal {
                self.update_tension(&mut model, &stats, &lengths)?;
            }

            let summary = PassSummary {
                pass,
                log_likelihood: stats.log_likelihood,
                tokens: stats.tokens,
                tension: model.tension(),
                rows,
                seconds: started.map_or(0.0, |t| t.elapsed().as_secs_f64()),
            };
            info!(
                pass,
                log_likelihood = summary.log_likelihood,
                cross_entropy = summary.cross_entropy(),
                perplexity = summary.perplexity(),
                tension = summary.tension,
                table = model.table().len(),
                seconds = summary.seconds,
                "pass complete"
            );
            report.passes.push(summary);

            if let (Some(threshold), Some(prev)) = (self.training.convergence_threshold, previous) {
                let gain = (stats.log_likelihood - prev) / prev.abs().max(f64::MIN_POSITIVE);
                if gain.abs() < threshold {
                    info!(pass, gain, "log-likelihood converged");
                    report.converged = true;
                    break;
                }
            }
            previous = Some(stats.log_likelihood);
        }

        if let Some(threshold) = self.training.prune_threshold {
            report.pruned = model.prune(threshold)?;
            debug!(pruned = report.pruned, threshold, "pruned table");
        }
        model.freeze();
        Ok((model, report))
    }

    fn update_tension(&self, model: &mut Model, stats: &PassStats, lengths: &LengthStats) -> Result<()> {
        let Some(empirical) = stats.empirical_feature() else {
            debug!("no non-null links this pass; tension unchanged");
            return Ok(());
        };
        if lengths.is_empty() {
            return Ok(());
        }
        let current = model.tension();
        let solver = self.training.tension_solver;
        let next = self.workers.install(|| solver.solve(current, empirical, lengths));
        if next.is_finite() && next >= 0.0 {
            debug!(current, next, empirical, "tension re-estimated");
            model.set_tension(next)
        } else {
            warn!(current, candidate = next, "tension update is not finite; keeping previous value");
            Ok(())
        }
    }
}
