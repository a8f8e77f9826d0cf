use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

use anyhow::{Context, Result};

use crate::bio::alignment::{alignment_length, AlignedSequences};
use crate::constants::GAP_CHAR;
use crate::reference::open_data_file;
use crate::data_types::{ClassEplets, EpletMatch, EpletResidues, EpletTable, MismatchRecord,
                        ResidueSet};
use crate::types::{AlleleId, Column, EpletId, Residue, ResiduePosition};

pub type GroupEplets = BTreeMap<EpletId, EpletResidues>;

// residue position to the eplets that use it
pub type EpletPositionIndex = BTreeMap<ResiduePosition, Vec<EpletId>>;

pub fn read_eplets<R: Read>(source: R) -> Result<EpletTable> {
    let eplets: EpletTable = serde_json::from_reader(source)?;
    Ok(eplets)
}

pub fn eplets_from_file(file_name: &str) -> Result<EpletTable> {
    let source = open_data_file(file_name)?;
    read_eplets(source).with_context(|| format!("failed to parse {}", file_name))
}

pub fn index_eplets(eplets: &GroupEplets) -> EpletPositionIndex {
    let mut index: EpletPositionIndex = BTreeMap::new();

    for (eplet_id, residues) in eplets {
        for pos in residues.keys() {
            index.entry(*pos).or_default().push(eplet_id.clone());
        }
    }

    index
}

// true if every residue of the eplet is at its position in the ungapped
// sequence
pub fn has_eplet(seq: &[Residue], residues: &EpletResidues) -> bool {
    !residues.is_empty() &&
        residues.iter().all(|(pos, residue)| {
            *pos >= 1 && seq.get(pos - 1) == Some(residue)
        })
}

pub fn eplets_in_sequence(seq: &str, eplets: &GroupEplets) -> Vec<EpletId> {
    let seq: Vec<Residue> = seq.chars().collect();

    eplets.iter()
        .filter(|(_, residues)| has_eplet(&seq, residues))
        .map(|(eplet_id, _)| eplet_id.clone())
        .collect()
}

struct RowLayout {
    ungapped: Vec<Residue>,
    // alignment column of each residue, indexed by residue position - 1
    residue_columns: Vec<Column>,
    // residue position in each column, None for gaps
    column_residues: Vec<Option<ResiduePosition>>,
}

impl RowLayout {
    fn new(aligned_seq: &str) -> RowLayout {
        let mut layout = RowLayout {
            ungapped: vec![],
            residue_columns: vec![],
            column_residues: vec![],
        };

        for (idx, c) in aligned_seq.chars().enumerate() {
            if c == GAP_CHAR {
                layout.column_residues.push(None);
            } else {
                layout.ungapped.push(c);
                layout.residue_columns.push(idx + 1);
                layout.column_residues.push(Some(layout.ungapped.len()));
            }
        }

        layout
    }
}

#[derive(Clone, Copy)]
enum Direction {
    DonorDiff,
    RecipDiff,
}

/// Cross-references the mismatches of one class with the known eplets of
/// the class group
pub struct EpletSearch<'a> {
    eplets: &'a GroupEplets,
    index: EpletPositionIndex,
    layouts: HashMap<&'a AlleleId, RowLayout>,
    alignment_length: usize,
    window_buffer: usize,
}

impl<'a> EpletSearch<'a> {
    pub fn new(alignment: &'a AlignedSequences, eplets: &'a GroupEplets, window_buffer: usize)
               -> EpletSearch<'a>
    {
        EpletSearch {
            eplets,
            index: index_eplets(eplets),
            layouts: alignment.iter()
                .map(|(allele_id, aligned_seq)| (allele_id, RowLayout::new(aligned_seq)))
                .collect(),
            alignment_length: alignment_length(alignment),
            window_buffer,
        }
    }

    fn carries(&self, allele_id: &AlleleId, residues: &EpletResidues) -> bool {
        self.layouts.get(allele_id)
            .is_some_and(|layout| has_eplet(&layout.ungapped, residues))
    }

    // the eplet's column range in the row of a carrier, widened by the buffer
    fn window(&self, carrier: &AlleleId, residues: &EpletResidues) -> Option<(Column, Column)> {
        let layout = self.layouts.get(carrier)?;
        let first = *residues.keys().next()?;
        let last = *residues.keys().next_back()?;

        let first_col = *layout.residue_columns.get(first.checked_sub(1)?)?;
        let last_col = *layout.residue_columns.get(last.checked_sub(1)?)?;

        Some((first_col.saturating_sub(self.window_buffer).max(1),
              (last_col + self.window_buffer).min(self.alignment_length)))
    }

    fn search_direction(&self, diffs: &[ResidueSet], this_side: &[AlleleId],
                        other_side: &[AlleleId], direction: Direction)
        -> BTreeMap<EpletId, EpletMatch>
    {
        let mut found = BTreeMap::new();
        let mut tried: HashSet<&EpletId> = HashSet::new();

        for (idx, diff) in diffs.iter().enumerate() {
            if diff.is_empty() || diff.contains(&GAP_CHAR) {
                continue;
            }

            let column = idx + 1;

            for allele_id in this_side {
                let Some(layout) = self.layouts.get(allele_id) else {
                    continue;
                };
                let Some(Some(residue_pos)) = layout.column_residues.get(idx) else {
                    continue;
                };
                let Some(eplet_ids) = self.index.get(residue_pos) else {
                    continue;
                };

                for eplet_id in eplet_ids {
                    if !tried.insert(eplet_id) {
                        continue;
                    }

                    let Some(residues) = self.eplets.get(eplet_id) else {
                        continue;
                    };

                    let carriers: Vec<AlleleId> = this_side.iter()
                        .filter(|allele_id| self.carries(allele_id, residues))
                        .cloned()
                        .collect();
                    let lacking: Vec<AlleleId> = other_side.iter()
                        .filter(|allele_id| !self.carries(allele_id, residues))
                        .cloned()
                        .collect();

                    if carriers.is_empty() || lacking.is_empty() {
                        continue;
                    }

                    let Some((min_pos, max_pos)) = self.window(&carriers[0], residues) else {
                        continue;
                    };

                    let (donors, recipients) = match direction {
                        Direction::DonorDiff => (carriers, lacking),
                        Direction::RecipDiff => (lacking, carriers),
                    };

                    found.insert(eplet_id.clone(), EpletMatch {
                        donors,
                        recipients,
                        mismatch_position: column,
                        min_pos,
                        max_pos,
                        eplet_data: residues.clone(),
                    });
                }
            }
        }

        found
    }

    pub fn class_eplets(&self, record: &MismatchRecord, donor_alleles: &[AlleleId],
                        recipient_alleles: &[AlleleId])
        -> ClassEplets
    {
        ClassEplets {
            donor_diff: self.search_direction(&record.donor_diff, donor_alleles,
                                              recipient_alleles, Direction::DonorDiff),
            recip_diff: self.search_direction(&record.recip_diff, recipient_alleles,
                                              donor_alleles, Direction::RecipDiff),
        }
    }
}
