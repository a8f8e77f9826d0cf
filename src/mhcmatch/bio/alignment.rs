use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::config::AlignmentConfig;
use crate::constants::GAP_CHAR;
use crate::types::{AlleleId, Column, Residue};

/// Allele id to gapped sequence, all rows of one alignment have the same
/// length
pub type AlignedSequences = BTreeMap<AlleleId, String>;

/// Column to the fraction of rows carrying the consensus symbol and the
/// symbol itself
pub type ConsensusDistribution = BTreeMap<Column, (f64, Residue)>;

/// One step of a pairwise alignment of another sequence against the center
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Step {
    #[default]
    Start,
    /// a center residue against a residue of the other sequence
    Match,
    /// a center residue against a gap in the other sequence
    GapInOther,
    /// a residue of the other sequence against a gap in the center
    GapInCenter,
}

#[derive(Clone, Copy, Debug, Default)]
struct Piece {
    score: i64,
    step: Step,
}

#[derive(Clone, Debug)]
pub struct PairwiseAlignment {
    pub score: i64,
    pub path: Vec<Step>,
}

/// Global Needleman-Wunsch alignment with a linear gap penalty.  Equal
/// scores are resolved by preferring a diagonal step, then a gap in the
/// other sequence, then a gap in the center.
pub fn align_pair(center: &[Residue], other: &[Residue], scoring: &AlignmentConfig)
                  -> PairwiseAlignment
{
    let gap = scoring.gap_score as i64;
    let mut matrix = vec![vec![Piece::default(); other.len() + 1]; center.len() + 1];

    for index_other in 1..=other.len() {
        matrix[0][index_other] = Piece {
            score: index_other as i64 * gap,
            step: Step::GapInCenter,
        };
    }

    for (index_center, row) in matrix.iter_mut().enumerate().skip(1) {
        row[0] = Piece {
            score: index_center as i64 * gap,
            step: Step::GapInOther,
        };
    }

    for index_center in 1..=center.len() {
        for index_other in 1..=other.len() {
            let pair_score =
                if center[index_center - 1] == other[index_other - 1] {
                    scoring.match_score
                } else {
                    scoring.mismatch_score
                } as i64;

            let candidates = [
                Piece {
                    score: matrix[index_center - 1][index_other - 1].score + pair_score,
                    step: Step::Match,
                },
                Piece {
                    score: matrix[index_center - 1][index_other].score + gap,
                    step: Step::GapInOther,
                },
                Piece {
                    score: matrix[index_center][index_other - 1].score + gap,
                    step: Step::GapInCenter,
                },
            ];

            let mut best = candidates[0];
            for candidate in &candidates[1..] {
                if candidate.score > best.score {
                    best = *candidate;
                }
            }

            matrix[index_center][index_other] = best;
        }
    }

    let mut path = vec![];
    let (mut index_center, mut index_other) = (center.len(), other.len());

    loop {
        let piece = matrix[index_center][index_other];
        match piece.step {
            Step::Start => break,
            Step::Match => {
                index_center -= 1;
                index_other -= 1;
            },
            Step::GapInOther => index_center -= 1,
            Step::GapInCenter => index_other -= 1,
        }
        path.push(piece.step);
    }

    path.reverse();

    PairwiseAlignment {
        score: matrix[center.len()][other.len()].score,
        path,
    }
}

// the other sequence laid out against the center: residues inserted
// before each center position (index center.len() is after the last one)
// and the symbol aligned to each center residue
struct CenterLayout {
    insertions: Vec<Vec<Residue>>,
    aligned: Vec<Residue>,
}

fn layout_against_center(center_len: usize, other: &[Residue], path: &[Step]) -> CenterLayout {
    let mut insertions = vec![vec![]; center_len + 1];
    let mut aligned = Vec::with_capacity(center_len);
    let mut other_iter = other.iter();

    for step in path {
        match step {
            Step::Match => {
                if let Some(residue) = other_iter.next() {
                    aligned.push(*residue);
                }
            },
            Step::GapInOther => aligned.push(GAP_CHAR),
            Step::GapInCenter => {
                if let Some(residue) = other_iter.next() {
                    insertions[aligned.len()].push(*residue);
                }
            },
            Step::Start => (),
        }
    }

    CenterLayout {
        insertions,
        aligned,
    }
}

fn render_row(layout: &CenterLayout, max_insertions: &[usize]) -> String {
    let mut row = String::new();

    for (slot, max_count) in max_insertions.iter().enumerate() {
        let inserted = &layout.insertions[slot];
        row.extend(inserted.iter());
        row.extend(std::iter::repeat_n(GAP_CHAR, max_count - inserted.len()));

        if let Some(residue) = layout.aligned.get(slot) {
            row.push(*residue);
        }
    }

    row
}

fn choose_center(sequences: &BTreeMap<AlleleId, String>) -> Option<&AlleleId> {
    let mut center: Option<(&AlleleId, usize)> = None;

    for (allele_id, seq) in sequences {
        let seq_len = seq.chars().count();
        match center {
            Some((_, center_len)) if center_len >= seq_len => (),
            _ => center = Some((allele_id, seq_len)),
        }
    }

    center.map(|(allele_id, _)| allele_id)
}

/// Center-star multiple alignment.  The longest sequence (smallest id on
/// ties) is the center, every other sequence is aligned to it and the
/// pairwise results are merged by keeping the largest insertion seen
/// before each center residue.
pub fn align_sequences(sequences: &BTreeMap<AlleleId, String>, scoring: &AlignmentConfig)
                       -> AlignedSequences
{
    let Some(center_id) = choose_center(sequences) else {
        return BTreeMap::new();
    };

    let center: Vec<Residue> = sequences[center_id].chars().collect();

    let layouts: Vec<(&AlleleId, CenterLayout)> = sequences.iter()
        .map(|(allele_id, seq)| {
            let other: Vec<Residue> = seq.chars().collect();
            let path =
                if allele_id == center_id {
                    vec![Step::Match; center.len()]
                } else {
                    align_pair(&center, &other, scoring).path
                };
            (allele_id, layout_against_center(center.len(), &other, &path))
        })
        .collect();

    let mut max_insertions = vec![0; center.len() + 1];
    for (_, layout) in &layouts {
        for (slot, inserted) in layout.insertions.iter().enumerate() {
            max_insertions[slot] = max_insertions[slot].max(inserted.len());
        }
    }

    layouts.iter()
        .map(|(allele_id, layout)| ((*allele_id).clone(), render_row(layout, &max_insertions)))
        .collect()
}

pub fn alignment_length(alignment: &AlignedSequences) -> usize {
    alignment.values().next()
        .map(|row| row.chars().count())
        .unwrap_or(0)
}

fn column_symbol_counts(alignment: &AlignedSequences) -> Vec<BTreeMap<Residue, usize>> {
    let mut counts = vec![BTreeMap::new(); alignment_length(alignment)];

    for row in alignment.values() {
        for (idx, c) in row.chars().enumerate() {
            if let Some(column_counts) = counts.get_mut(idx) {
                *column_counts.entry(c).or_insert(0) += 1;
            }
        }
    }

    counts
}

// most frequent symbol, a residue wins a tie against a gap, then the
// smallest residue wins
fn consensus_symbol(column_counts: &BTreeMap<Residue, usize>) -> Option<(Residue, usize)> {
    column_counts.iter()
        .max_by_key(|(c, count)| (**count, **c != GAP_CHAR, Reverse(**c)))
        .map(|(c, count)| (*c, *count))
}

pub fn consensus(alignment: &AlignedSequences) -> String {
    column_symbol_counts(alignment).iter()
        .filter_map(consensus_symbol)
        .map(|(c, _)| c)
        .collect()
}

pub fn consensus_distribution(alignment: &AlignedSequences) -> ConsensusDistribution {
    let row_count = alignment.len() as f64;

    column_symbol_counts(alignment).iter()
        .enumerate()
        .filter_map(|(idx, column_counts)| {
            consensus_symbol(column_counts)
                .map(|(c, count)| (idx + 1, (count as f64 / row_count, c)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap_friendly_scoring() -> AlignmentConfig {
        AlignmentConfig {
            match_score: 2,
            mismatch_score: -3,
            gap_score: -1,
        }
    }

    fn make_sequences(seqs: &[(&str, &str)]) -> BTreeMap<AlleleId, String> {
        seqs.iter()
            .map(|(id, seq)| (id.to_string(), seq.to_string()))
            .collect()
    }

    #[test]
    fn pairwise_identical() {
        let seq: Vec<char> = "ACDEF".chars().collect();
        let result = align_pair(&seq, &seq, &AlignmentConfig::default());
        assert_eq!(result.score, 5);
        assert_eq!(result.path, vec![Step::Match; 5]);
    }

    #[test]
    fn pairwise_deletion() {
        let center: Vec<char> = "ACDEF".chars().collect();
        let other: Vec<char> = "ACEF".chars().collect();
        let result = align_pair(&center, &other, &AlignmentConfig::default());
        assert_eq!(result.score, 2);
        assert_eq!(result.path,
                   vec![Step::Match, Step::Match, Step::GapInOther, Step::Match, Step::Match]);
    }

    #[test]
    fn pairwise_empty_other() {
        let center: Vec<char> = "ACD".chars().collect();
        let result = align_pair(&center, &[], &AlignmentConfig::default());
        assert_eq!(result.path, vec![Step::GapInOther; 3]);
    }

    #[test]
    fn center_star_merge() {
        let sequences = make_sequences(&[
            ("x1", "ACDEFGH"),
            ("x2", "ACWDEF"),
            ("x3", "ACEFGH"),
        ]);

        let alignment = align_sequences(&sequences, &gap_friendly_scoring());

        assert_eq!(alignment["x1"], "AC-DEFGH");
        assert_eq!(alignment["x2"], "ACWDEF--");
        assert_eq!(alignment["x3"], "AC--EFGH");
        assert_eq!(alignment_length(&alignment), 8);

        assert_eq!(consensus(&alignment), "AC-DEFGH");

        let distribution = consensus_distribution(&alignment);
        assert_eq!(distribution.len(), 8);
        assert_eq!(distribution[&1], (1.0, 'A'));
        assert_eq!(distribution[&4].1, 'D');
        assert!((distribution[&4].0 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_and_one_sequence() {
        let empty = align_sequences(&BTreeMap::new(), &AlignmentConfig::default());
        assert!(empty.is_empty());
        assert_eq!(consensus(&empty), "");

        let single = align_sequences(&make_sequences(&[("a", "MKV")]),
                                     &AlignmentConfig::default());
        assert_eq!(single["a"], "MKV");
        assert_eq!(consensus(&single), "MKV");
    }

    #[test]
    fn center_tie_uses_smallest_id() {
        let sequences = make_sequences(&[("b", "ACD"), ("a", "ACE")]);
        assert_eq!(choose_center(&sequences).unwrap(), "a");
    }

    #[test]
    fn consensus_tie_break() {
        let alignment = make_sequences(&[("a", "A-C"), ("b", "-DA")]);
        // A beats the gap, D beats the gap, A beats C
        assert_eq!(consensus(&alignment), "ADA");
    }
}
