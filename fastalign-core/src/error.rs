//! Error type shared by every fastalign component.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    /// Invalid model or training configuration, reported before training starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A frozen model was asked to accept counts or start a pass.
    #[error("model is frozen: {0}")]
    Frozen(&'static str),

    /// Training stopped at a pass boundary; the unfinished pass was discarded.
    #[error("training cancelled after {completed_passes} completed passes")]
    Cancelled { completed_passes: usize },

    #[error("corpus error at line {line}: {message}")]
    Corpus { line: usize, message: String },

    /// Alignments or models of the wrong direction or shape were combined.
    #[error("alignment mismatch: {0}")]
    Mismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("unsupported model file (magic {magic:#x}, version {version})")]
    UnsupportedVersion { magic: u32, version: u32 },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, AlignError>;

impl AlignError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn corpus(line: usize, message: impl Into<String>) -> Self {
        Self::Corpus {
            line,
            message: message.into(),
        }
    }
}
