use serde::{Deserialize, Serialize};

use crate::error::{AlignError, Result};
use crate::tension::TensionSolver;
use crate::types::*;

/// Immutable per-model settings. `reverse` selects the direction: the forward
/// model links every source position to a target position (or NULL), the
/// reverse model links every target position to a source position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub reverse: bool,
    pub use_null: bool,
    pub favor_diagonal: bool,
    pub prob_align_null: Prob,
    pub diagonal_tension: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            reverse: false,
            use_null: true,
            favor_diagonal: true,
            prob_align_null: DEFAULT_PROB_ALIGN_NULL,
            diagonal_tension: DEFAULT_DIAGONAL_TENSION,
        }
    }
}

impl ModelConfig {
    pub fn reversed(self) -> Self {
        ModelConfig {
            reverse: !self.reverse,
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.prob_align_null) {
            return Err(AlignError::config(format!(
                "prob_align_null must be in [0, 1), got {}",
                self.prob_align_null
            )));
        }
        if !self.diagonal_tension.is_finite() || self.diagonal_tension < 0.0 {
            return Err(AlignError::config(format!(
                "diagonal_tension must be finite and >= 0, got {}",
                self.diagonal_tension
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub iterations: usize,
    /// Worker threads; 0 means one per available core.
    pub threads: usize,
    /// Count-accumulator shards, rounded up to a power of two.
    pub shards: usize,
    /// Stop early once the relative log-likelihood gain of a pass drops below this.
    pub convergence_threshold: Option<f64>,
    /// Dirichlet concentration for variational-Bayes normalization.
    pub variational_bayes: Option<f64>,
    /// Entries below this probability are dropped after the final pass.
    pub prune_threshold: Option<Prob>,
    pub tension_solver: TensionSolver,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            iterations: DEFAULT_ITERATIONS,
            threads: 0,
            shards: 256,
            convergence_threshold: None,
            variational_bayes: None,
            prune_threshold: None,
            tension_solver: TensionSolver::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(AlignError::config("iterations must be positive"));
        }
        if self.shards == 0 {
            return Err(AlignError::config("shards must be positive"));
        }
        if let Some(t) = self.convergence_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(AlignError::config(format!(
                    "convergence_threshold must be finite and >= 0, got {t}"
                )));
            }
        }
        if let Some(alpha) = self.variational_bayes {
            if !alpha.is_finite() || alpha <= 0.0 {
                return Err(AlignError::config(format!(
                    "variational Bayes alpha must be > 0, got {alpha}"
                )));
            }
        }
        if let Some(p) = self.prune_threshold {
            if !(0.0..1.0).contains(&p) {
                return Err(AlignError::config(format!(
                    "prune_threshold must be in [0, 1), got {p}"
                )));
            }
        }
        self.tension_solver.validate()
    }

    pub fn worker_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
