use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::bio::alignment::{alignment_length, AlignedSequences};
use crate::bio::solvent_accessibility::{project_profile, RsaProfile};
use crate::data_types::{MismatchRecord, ResidueSet};
use crate::types::{AlleleId, Residue};

// one allele of one side, laid out by alignment column
struct AlignedAllele {
    residues: Vec<Residue>,
    rsa: Vec<Option<f64>>,
}

fn aligned_alleles(allele_ids: &[AlleleId], alignment: &AlignedSequences,
                   profiles: &HashMap<AlleleId, RsaProfile>)
    -> Vec<AlignedAllele>
{
    allele_ids.iter()
        .filter_map(|allele_id| {
            let aligned_seq = alignment.get(allele_id)?;
            let rsa = profiles.get(allele_id)
                .map(|profile| project_profile(aligned_seq, profile))
                .unwrap_or_else(|| vec![None; aligned_seq.chars().count()]);
            Some(AlignedAllele {
                residues: aligned_seq.chars().collect(),
                rsa,
            })
        })
        .collect()
}

fn residues_at(alleles: &[AlignedAllele], idx: usize) -> Vec<Residue> {
    alleles.iter()
        .filter_map(|allele| allele.residues.get(idx).copied())
        .collect()
}

// a residue is kept if some allele carrying it at this column is exposed
// enough, or if the RSA of a carrier is unknown
fn is_relevant(carriers: &[AlignedAllele], idx: usize, residue: Residue, rsa_threshold: f64)
    -> bool
{
    let mut max_rsa: Option<f64> = None;

    for allele in carriers {
        if allele.residues.get(idx) != Some(&residue) {
            continue;
        }

        match allele.rsa.get(idx).copied().flatten() {
            Some(rsa) => max_rsa = Some(max_rsa.map_or(rsa, |max| max.max(rsa))),
            None => return true,
        }
    }

    max_rsa.is_some_and(|max| max >= rsa_threshold)
}

struct SideDiff {
    diff: Vec<ResidueSet>,
    counts: Vec<BTreeMap<Residue, usize>>,
    ratios: Vec<BTreeMap<Residue, f64>>,
    updated: Vec<ResidueSet>,
}

fn side_diff(this_side: &[AlignedAllele], other_side: &[AlignedAllele],
             length: usize, rsa_threshold: f64)
    -> SideDiff
{
    let mut side_diff = SideDiff {
        diff: Vec::with_capacity(length),
        counts: Vec::with_capacity(length),
        ratios: Vec::with_capacity(length),
        updated: Vec::with_capacity(length),
    };

    let allele_count = this_side.len() as f64;

    for idx in 0..length {
        let these = residues_at(this_side, idx);
        let others: BTreeSet<Residue> = residues_at(other_side, idx).into_iter().collect();

        let diff: ResidueSet = these.iter()
            .filter(|residue| !others.contains(residue))
            .copied()
            .collect();

        let counts: BTreeMap<Residue, usize> = diff.iter()
            .map(|residue| (*residue, these.iter().filter(|c| *c == residue).count()))
            .collect();

        let ratios = counts.iter()
            .map(|(residue, count)| (*residue, *count as f64 / allele_count))
            .collect();

        let updated = diff.iter()
            .filter(|residue| is_relevant(this_side, idx, **residue, rsa_threshold))
            .copied()
            .collect();

        side_diff.diff.push(diff);
        side_diff.counts.push(counts);
        side_diff.ratios.push(ratios);
        side_diff.updated.push(updated);
    }

    side_diff
}

pub fn non_empty_count(sets: &[ResidueSet]) -> usize {
    sets.iter().filter(|set| !set.is_empty()).count()
}

/// Compare the alleles of one donor and one recipient in a class.  A gap
/// counts as a symbol.  If either side has no alleles in the class the
/// record is empty.
pub fn compare_class(donor_alleles: &[AlleleId], recipient_alleles: &[AlleleId],
                     alignment: &AlignedSequences,
                     profiles: &HashMap<AlleleId, RsaProfile>,
                     rsa_threshold: f64)
    -> MismatchRecord
{
    let donors = aligned_alleles(donor_alleles, alignment, profiles);
    let recipients = aligned_alleles(recipient_alleles, alignment, profiles);

    if donors.is_empty() || recipients.is_empty() {
        return MismatchRecord::default();
    }

    let length = alignment_length(alignment);

    let donor_side = side_diff(&donors, &recipients, length, rsa_threshold);
    let recip_side = side_diff(&recipients, &donors, length, rsa_threshold);

    MismatchRecord {
        donor_diff_score: non_empty_count(&donor_side.diff),
        recip_diff_score: non_empty_count(&recip_side.diff),
        updated_mismatches_count: non_empty_count(&donor_side.updated),
        updated_recip_mismatches_count: non_empty_count(&recip_side.updated),
        donor_diff: donor_side.diff,
        recip_diff: recip_side.diff,
        all_donor_diff_counts: donor_side.counts,
        all_donor_diff_ratios: donor_side.ratios,
        all_recip_diff_counts: recip_side.counts,
        all_recip_diff_ratios: recip_side.ratios,
        updated_mismatches: donor_side.updated,
        updated_recip_mismatches: recip_side.updated,
    }
}
