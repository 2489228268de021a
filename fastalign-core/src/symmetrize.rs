//! Symmetrization of a forward and a reverse alignment.
//!
//! The growing heuristics follow the Moses recipe:
//!
//! - start from the intersection `A` of both link sets;
//! - grow: repeatedly add links of the union `U` that neighbour a link of
//!   `A` (including diagonally) and cover a still unaligned word;
//! - final: add remaining links of the forward, then the reverse set whose
//!   source or target word is unaligned (`final-and`: both unaligned).
//!
//! Link sets are visited in sorted order so the result is deterministic.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use hashbrown::HashSet;
use rayon::prelude::*;

use crate::error::{AlignError, Result};
use crate::model::{Alignment, Model};
use crate::types::{SentencePair, Token};

type Point = (usize, usize);

const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Symmetrization {
    Intersection,
    Union,
    GrowDiagonal,
    GrowDiagonalFinal,
    #[default]
    GrowDiagonalFinalAnd,
}

impl Symmetrization {
    pub const ALL: [Symmetrization; 5] = [
        Symmetrization::Intersection,
        Symmetrization::Union,
        Symmetrization::GrowDiagonal,
        Symmetrization::GrowDiagonalFinal,
        Symmetrization::GrowDiagonalFinalAnd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Symmetrization::Intersection => "intersect",
            Symmetrization::Union => "union",
            Symmetrization::GrowDiagonal => "grow-diag",
            Symmetrization::GrowDiagonalFinal => "grow-diag-final",
            Symmetrization::GrowDiagonalFinalAnd => "grow-diag-final-and",
        }
    }
}

impl fmt::Display for Symmetrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Symmetrization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Symmetrization::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Symmetrization::ALL.iter().map(|m| m.name()).collect();
                format!("unknown symmetrization '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// Combines the links of a forward and a reverse alignment of the same
/// sentence pair into sorted `(source, target)` pairs.
pub fn symmetrize(forward: &Alignment, reverse: &Alignment, method: Symmetrization) -> Result<Vec<Point>> {
    if forward.is_reverse() || !reverse.is_reverse() {
        return Err(AlignError::Mismatch(
            "expected a forward and a reverse alignment".to_string(),
        ));
    }
    let src_len = forward.len();
    let tgt_len = reverse.len();
    let s_fw = forward.pairs();
    let s_rev = reverse.pairs();
    if let Some(&(i, j)) = s_fw.iter().chain(&s_rev).find(|&&(i, j)| i >= src_len || j >= tgt_len) {
        return Err(AlignError::Mismatch(format!(
            "link {i}-{j} outside a {src_len}x{tgt_len} sentence pair"
        )));
    }

    let rev_set: HashSet<Point> = s_rev.iter().copied().collect();
    let intersection: Vec<Point> = s_fw.iter().copied().filter(|p| rev_set.contains(p)).collect();

    let mut out = match method {
        Symmetrization::Intersection => intersection,
        Symmetrization::Union => {
            let only_rev: Vec<Point> = s_rev
                .iter()
                .copied()
                .filter(|p| s_fw.binary_search(p).is_err())
                .collect();
            let mut u = s_fw;
            u.extend(only_rev);
            u
        }
        Symmetrization::GrowDiagonal
        | Symmetrization::GrowDiagonalFinal
        | Symmetrization::GrowDiagonalFinalAnd => {
            let mut grid = Grid::new(src_len, tgt_len, &intersection);
            let union: HashSet<Point> = s_fw.iter().chain(&s_rev).copied().collect();
            grid.grow_diagonal(&intersection, &union);
            match method {
                Symmetrization::GrowDiagonalFinal => {
                    grid.finish(&s_fw, false);
                    grid.finish(&s_rev, false);
                }
                Symmetrization::GrowDiagonalFinalAnd => {
                    grid.finish(&s_fw, true);
                    grid.finish(&s_rev, true);
                }
                _ => {}
            }
            grid.links.into_iter().collect()
        }
    };
    out.sort_unstable();
    Ok(out)
}

struct Grid {
    src_len: usize,
    tgt_len: usize,
    links: HashSet<Point>,
    src_aligned: Vec<bool>,
    tgt_aligned: Vec<bool>,
}

impl Grid {
    fn new(src_len: usize, tgt_len: usize, start: &[Point]) -> Self {
        let mut grid = Grid {
            src_len,
            tgt_len,
            links: HashSet::new(),
            src_aligned: vec![false; src_len],
            tgt_aligned: vec![false; tgt_len],
        };
        for &p in start {
            grid.add(p);
        }
        grid
    }

    fn add(&mut self, (i, j): Point) {
        self.links.insert((i, j));
        self.src_aligned[i] = true;
        self.tgt_aligned[j] = true;
    }

    fn grow_diagonal(&mut self, start: &[Point], union: &HashSet<Point>) {
        let mut queue: VecDeque<Point> = start.iter().copied().collect();
        while let Some((i, j)) = queue.pop_front() {
            for (di, dj) in NEIGHBOURS {
                let (Some(i2), Some(j2)) = (i.checked_add_signed(di), j.checked_add_signed(dj)) else {
                    continue;
                };
                if i2 >= self.src_len || j2 >= self.tgt_len {
                    continue;
                }
                let p = (i2, j2);
                if union.contains(&p)
                    && !self.links.contains(&p)
                    && (!self.src_aligned[i2] || !self.tgt_aligned[j2])
                {
                    self.add(p);
                    queue.push_back(p);
                }
            }
        }
    }

    fn finish(&mut self, links: &[Point], both_unaligned: bool) {
        for &(i, j) in links {
            if self.links.contains(&(i, j)) {
                continue;
            }
            let admit = if both_unaligned {
                !self.src_aligned[i] && !self.tgt_aligned[j]
            } else {
                !self.src_aligned[i] || !self.tgt_aligned[j]
            };
            if admit {
                self.add((i, j));
            }
        }
    }
}

/// A forward and a reverse model aligned together and symmetrized.
#[derive(Debug)]
pub struct SymmetricAligner {
    forward: Model,
    reverse: Model,
    method: Symmetrization,
}

impl SymmetricAligner {
    pub fn new(forward: Model, reverse: Model, method: Symmetrization) -> Result<Self> {
        if forward.is_reverse() || !reverse.is_reverse() {
            return Err(AlignError::Mismatch(
                "symmetric aligner needs a forward and a reverse model".to_string(),
            ));
        }
        Ok(SymmetricAligner {
            forward,
            reverse,
            method,
        })
    }

    pub fn method(&self) -> Symmetrization {
        self.method
    }

    pub fn forward(&self) -> &Model {
        &self.forward
    }

    pub fn reverse(&self) -> &Model {
        &self.reverse
    }

    pub fn align(&self, source: &[Token], target: &[Token]) -> Result<Vec<Point>> {
        let fwd = self.forward.compute_alignment(source, target);
        let rev = self.reverse.compute_alignment(source, target);
        symmetrize(&fwd, &rev, self.method)
    }

    /// Symmetrized links for every pair of `batch`, in input order.
    pub fn align_batch(&self, batch: &[SentencePair]) -> Result<Vec<Vec<Point>>> {
        let fwd = self.forward.compute_alignments(batch);
        let rev = self.reverse.compute_alignments(batch);
        fwd.par_iter()
            .zip(rev.par_iter())
            .map(|(f, r)| symmetrize(f, r, self.method))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NULL_LINK;

    fn fwd(links: &[u32]) -> Alignment {
        Alignment::new(links.to_vec(), false)
    }

    fn rev(links: &[u32]) -> Alignment {
        Alignment::new(links.to_vec(), true)
    }

    #[test]
    fn agreeing_directions_are_kept_by_every_method() {
        for method in Symmetrization::ALL {
            let out = symmetrize(&fwd(&[0, 1, 2]), &rev(&[0, 1, 2]), method).unwrap();
            assert_eq!(out, vec![(0, 0), (1, 1), (2, 2)], "{method}");
        }
    }

    #[test]
    fn grow_diag_follows_the_diagonal() {
        // Forward: 0->0, 1->NULL, 2->2. Reverse (target view): 0->0, 1->1, 2->NULL.
        // A = {(0,0)}, U adds (1,1) and (2,2), each reached through a diagonal neighbour.
        let f = fwd(&[0, NULL_LINK, 2]);
        let r = rev(&[0, 1, NULL_LINK]);
        assert_eq!(symmetrize(&f, &r, Symmetrization::Intersection).unwrap(), vec![(0, 0)]);
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::GrowDiagonal).unwrap(),
            vec![(0, 0), (1, 1), (2, 2)]
        );
    }

    #[test]
    fn final_and_prefers_forward_links() {
        // Empty intersection: nothing to grow from. Forward links are admitted
        // first and leave no unaligned word for the reverse ones.
        let f = fwd(&[1, 0]);
        let r = rev(&[0, 1]);
        assert!(symmetrize(&f, &r, Symmetrization::GrowDiagonal).unwrap().is_empty());
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::GrowDiagonalFinalAnd).unwrap(),
            vec![(0, 1), (1, 0)]
        );
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::Union).unwrap(),
            vec![(0, 0), (0, 1), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn final_admits_links_with_one_unaligned_word() {
        // Forward: 0->0, 1->0. Reverse: 0->0 only.
        let f = fwd(&[0, 0]);
        let r = rev(&[0]);
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::GrowDiagonalFinalAnd).unwrap(),
            vec![(0, 0), (1, 0)]
        );
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::GrowDiagonalFinal).unwrap(),
            vec![(0, 0), (1, 0)]
        );
        let r = rev(&[NULL_LINK]);
        assert_eq!(symmetrize(&f, &r, Symmetrization::GrowDiagonalFinalAnd).unwrap(), vec![(0, 0)]);
        assert_eq!(
            symmetrize(&f, &r, Symmetrization::GrowDiagonalFinal).unwrap(),
            vec![(0, 0), (1, 0)]
        );
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        assert!(symmetrize(&fwd(&[0]), &fwd(&[0]), Symmetrization::Union).is_err());
        assert!(symmetrize(&fwd(&[3]), &rev(&[0]), Symmetrization::Union).is_err());
    }

    #[test]
    fn names_parse_back() {
        for method in Symmetrization::ALL {
            assert_eq!(method.name().parse::<Symmetrization>(), Ok(method));
        }
        assert!("diag".parse::<Symmetrization>().is_err());
    }

    #[test]
    fn aligner_requires_both_directions() {
        use crate::config::ModelConfig;
        let f = Model::new(ModelConfig::default()).unwrap();
        let r = Model::new(ModelConfig::default().reversed()).unwrap();
        let aligner = SymmetricAligner::new(f, r, Symmetrization::default()).unwrap();
        let batch = vec![
            SentencePair::new(vec![1, 2, 3], vec![4, 5, 6]),
            SentencePair::new(vec![], vec![4]),
        ];
        let out = aligner.align_batch(&batch).unwrap();
        assert_eq!(out[0], vec![(0, 0), (1, 1), (2, 2)]);
        assert!(out[1].is_empty());
        assert_eq!(out[0], aligner.align(&batch[0].source, &batch[0].target).unwrap());

        let f = Model::new(ModelConfig::default()).unwrap();
        let g = Model::new(ModelConfig::default()).unwrap();
        assert!(SymmetricAligner::new(f, g, Symmetrization::Union).is_err());
    }
}
