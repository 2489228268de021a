pub type Link = u32;
pub type Token = u32;
pub type Prob = f64;

/// Marks an aligned position that is explained by the NULL word.
pub const NULL_LINK: Link = Link::MAX;
/// Vocabulary id reserved for the NULL word.
pub const NULL_TOKEN: Token = 0;

/// Read value for pairs the table has never stored.
pub const NULL_PROBABILITY: Prob = 1e-9;

pub const MAX_SENT_LEN: usize = 0x400;

pub const DEFAULT_ITERATIONS: usize = 5;
pub const DEFAULT_PROB_ALIGN_NULL: Prob = 0.08;
pub const DEFAULT_DIAGONAL_TENSION: f64 = 4.0;

// Range re-estimated tension values are clamped to.
pub const TENSION_MIN: f64 = 0.1;
pub const TENSION_MAX: f64 = 14.0;

/// One training/alignment unit: token ids of a source and a target sentence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SentencePair {
    pub source: Vec<Token>,
    pub target: Vec<Token>,
}

impl SentencePair {
    pub fn new(source: Vec<Token>, target: Vec<Token>) -> Self {
        SentencePair { source, target }
    }

    /// Splits the pair into (aligned side, candidate side) for a direction.
    #[inline]
    pub fn oriented(&self, reverse: bool) -> (&[Token], &[Token]) {
        if reverse {
            (&self.target, &self.source)
        } else {
            (&self.source, &self.target)
        }
    }
}

#[inline]
pub fn shard_index(e: Token, f: Token, mask: usize) -> usize {
    let h = ((e as u64) << 32 | f as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    (h >> 32) as usize & mask
}
