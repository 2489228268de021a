//! Reparameterized IBM Model 2 word alignment.
//!
//! [`Builder`] trains a [`Model`] by EM over a corpus of [`SentencePair`]s;
//! the model then produces Viterbi [`Alignment`]s, which [`symmetrize`]
//! combines across directions.

pub mod builder;
pub mod config;
pub mod diagonal;
pub mod error;
pub mod model;
pub mod symmetrize;
pub mod table;
pub mod tension;
pub mod text;
pub mod types;
pub mod vocab;

pub use builder::{Builder, PassSummary, TrainingReport};
pub use config::{ModelConfig, TrainingConfig};
pub use diagonal::AlignmentScorer;
pub use error::{AlignError, Result};
pub use model::{Alignment, Model, PassStats, Phase};
pub use symmetrize::{symmetrize, SymmetricAligner, Symmetrization};
pub use table::ProbabilityTable;
pub use tension::{LengthStats, TensionSolver};
pub use text::{write_moses, write_moses_pairs, write_scores, Corpus};
pub use types::*;
pub use vocab::Vocabulary;
