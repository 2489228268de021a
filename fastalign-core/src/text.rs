//! Plaintext corpus loading and Moses-style output.

use std::io::{Read, Write};

use crate::error::{AlignError, Result};
use crate::model::Alignment;
use crate::types::*;
use crate::vocab::Vocabulary;

/// A parallel corpus encoded against one vocabulary per side.
#[derive(Clone, Debug, Default)]
pub struct Corpus {
    pub source_vocab: Vocabulary,
    pub target_vocab: Vocabulary,
    pub pairs: Vec<SentencePair>,
}

impl Corpus {
    /// One sentence per line, tokens separated by whitespace. Blank lines
    /// are empty sentences.
    pub fn from_plaintext(source: &str, target: &str) -> Result<Self> {
        let mut corpus = Corpus::default();
        corpus.extend_plaintext(source, target)?;
        Ok(corpus)
    }

    /// An empty corpus whose ids continue the given vocabularies, so that
    /// text loaded into it matches a previously saved model.
    pub fn with_vocabularies(source_vocab: Vocabulary, target_vocab: Vocabulary) -> Self {
        Corpus {
            source_vocab,
            target_vocab,
            pairs: Vec::new(),
        }
    }

    pub fn save_vocabularies<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, &(&self.source_vocab, &self.target_vocab))?;
        Ok(())
    }

    /// Reads vocabularies written by [`Corpus::save_vocabularies`] into an
    /// empty corpus.
    pub fn load_vocabularies<R: Read>(reader: R) -> Result<Self> {
        let (source_vocab, target_vocab): (Vocabulary, Vocabulary) = bincode::deserialize_from(reader)?;
        Ok(Self::with_vocabularies(source_vocab, target_vocab))
    }

    /// Appends more sentence pairs, reusing the existing vocabularies.
    pub fn extend_plaintext(&mut self, source: &str, target: &str) -> Result<()> {
        let mut src = source.lines();
        let mut tgt = target.lines();
        let first = self.pairs.len() + 1;
        for line in first.. {
            match (src.next(), tgt.next()) {
                (Some(s), Some(t)) => {
                    let pair = SentencePair::new(
                        encode_line(&mut self.source_vocab, s, line)?,
                        encode_line(&mut self.target_vocab, t, line)?,
                    );
                    self.pairs.push(pair);
                }
                (None, None) => return Ok(()),
                (Some(_), None) => {
                    return Err(AlignError::corpus(line, "target side has fewer lines than source"));
                }
                (None, Some(_)) => {
                    return Err(AlignError::corpus(line, "source side has fewer lines than target"));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn encode_line(vocab: &mut Vocabulary, line: &str, number: usize) -> Result<Vec<Token>> {
    let tokens = vocab.encode(line);
    if tokens.len() > MAX_SENT_LEN {
        return Err(AlignError::corpus(
            number,
            format!("sentence too long: {} > {}", tokens.len(), MAX_SENT_LEN),
        ));
    }
    Ok(tokens)
}

/// One line per alignment, links as `source-target`.
pub fn write_moses(alignments: &[Alignment]) -> String {
    let mut out = String::new();
    for alignment in alignments {
        push_pairs(&mut out, &alignment.pairs());
    }
    out
}

/// Same format as [`write_moses`] for already-combined link sets.
pub fn write_moses_pairs(pairs: &[Vec<(usize, usize)>]) -> String {
    let mut out = String::new();
    for links in pairs {
        push_pairs(&mut out, links);
    }
    out
}

fn push_pairs(out: &mut String, links: &[(usize, usize)]) {
    for (k, (i, j)) in links.iter().enumerate() {
        if k > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{i}-{j}"));
    }
    out.push('\n');
}

/// Per-pair scores as negative log-likelihoods.
pub fn write_scores(scores: &[f64]) -> String {
    let mut out = String::new();
    for &score in scores {
        out.push_str(&format!("{}\n", -score));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_builds_both_vocabularies() {
        let corpus = Corpus::from_plaintext("a b\n\nb c\n", "x\ny z\nz\n").unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.pairs[0], SentencePair::new(vec![1, 2], vec![1]));
        assert_eq!(corpus.pairs[1], SentencePair::new(vec![], vec![2, 3]));
        assert_eq!(corpus.pairs[2], SentencePair::new(vec![2, 3], vec![3]));
        assert_eq!(corpus.source_vocab.len(), 4);
        assert_eq!(corpus.target_vocab.lookup("z"), Some(3));
    }

    #[test]
    fn mismatched_line_counts_are_rejected() {
        let err = Corpus::from_plaintext("a\nb\nc\n", "x\ny\n").unwrap_err();
        assert!(matches!(err, AlignError::Corpus { line: 3, .. }));
        assert!(Corpus::from_plaintext("a\n", "x\ny\n").is_err());
    }

    #[test]
    fn overlong_sentences_are_rejected() {
        let long = vec!["w"; MAX_SENT_LEN + 1].join(" ");
        let err = Corpus::from_plaintext(&long, "x").unwrap_err();
        assert!(matches!(err, AlignError::Corpus { line: 1, .. }));
    }

    #[test]
    fn extending_keeps_line_numbers_and_ids() {
        let mut corpus = Corpus::from_plaintext("a\n", "x\n").unwrap();
        corpus.extend_plaintext("a b\n", "x\n").unwrap();
        assert_eq!(corpus.pairs[1].source, vec![1, 2]);
        let err = corpus.extend_plaintext("a\n", "").unwrap_err();
        assert!(matches!(err, AlignError::Corpus { line: 3, .. }));
    }

    #[test]
    fn saved_vocabularies_keep_ids() {
        let corpus = Corpus::from_plaintext("le chat\n", "the cat\n").unwrap();
        let mut bytes = Vec::new();
        corpus.save_vocabularies(&mut bytes).unwrap();
        let mut reloaded = Corpus::load_vocabularies(bytes.as_slice()).unwrap();
        assert!(reloaded.is_empty());
        reloaded.extend_plaintext("chat noir\n", "black cat\n").unwrap();
        assert_eq!(reloaded.pairs[0].source, vec![2, 3]);
        assert_eq!(reloaded.pairs[0].target, vec![3, 2]);
    }

    #[test]
    fn moses_output_orients_reverse_links() {
        let fwd = Alignment::new(vec![0, NULL_LINK, 1], false);
        let rev = Alignment::new(vec![2, 0], true);
        let empty = Alignment::new(vec![], false);
        assert_eq!(write_moses(&[fwd, rev, empty]), "0-0 2-1\n0-1 2-0\n\n");
        assert_eq!(write_moses_pairs(&[vec![(1, 3)], vec![]]), "1-3\n\n");
    }

    #[test]
    fn scores_are_negated() {
        assert_eq!(write_scores(&[-1.5, 2.0]), "1.5\n-2\n");
        assert_eq!(write_scores(&[]), "");
    }

    #[test]
    fn multi_digit_positions_are_written_whole() {
        let links = vec![(10, 2), (3, 117)];
        assert_eq!(write_moses_pairs(&[links]), "10-2 3-117\n");
    }
}
