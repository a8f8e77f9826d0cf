use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::bio::alignment::{alignment_length, AlignedSequences};
use crate::bio::util::residue_numbering;
use crate::constants::MAX_ASA;
use crate::data_types::{AlleleRecord, ClassGroupedScores, GroupedScore};
use crate::reference::open_data_file;
use crate::types::{AlleleId, ResiduePosition, Residue};

/// Residue position to relative solvent accessibility in [0,1]
pub type RsaProfile = BTreeMap<ResiduePosition, f64>;

/// Per allele profiles read from the structural table
pub type StructureMap = HashMap<AlleleId, RsaProfile>;

#[derive(Deserialize, Clone, Debug)]
struct StructureSourceRow {
    pub allele: AlleleId,
    pub position: ResiduePosition,
    pub residue: String,
    pub asa: Option<f64>,
}

pub fn max_asa(residue: Residue) -> Option<f64> {
    let residue = residue.to_ascii_uppercase();
    MAX_ASA.iter()
        .find(|(c, _)| *c == residue)
        .map(|(_, max)| *max)
}

// None for unknown residues and for missing or non-finite values
pub fn asa_to_rsa(residue: Residue, asa: Option<f64>) -> Option<f64> {
    let asa = asa.filter(|asa| asa.is_finite())?;
    let max = max_asa(residue)?;

    Some((asa / max).clamp(0.0, 1.0))
}

pub fn read_structures<R: Read>(source: R) -> Result<StructureMap> {
    let mut structures: StructureMap = HashMap::new();

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(source);

    for result in csv_reader.deserialize() {
        let row: StructureSourceRow = result.context("failed to read structure row")?;

        let Some(residue) = row.residue.chars().next() else {
            continue;
        };

        if row.position == 0 {
            warn!("ignoring structure row with position 0 for {}", row.allele);
            continue;
        }

        if let Some(rsa) = asa_to_rsa(residue, row.asa) {
            structures.entry(row.allele)
                .or_default()
                .insert(row.position, rsa);
        }
    }

    Ok(structures)
}

pub fn structures_from_file(file_name: &str) -> Result<StructureMap> {
    let source = open_data_file(file_name)?;
    read_structures(source).with_context(|| format!("failed to parse {}", file_name))
}

/// The profile of one allele.  The structural table takes precedence over
/// relative values in the record, which take precedence over absolute
/// values in the record.  Alleles without any data have no profile.
pub fn rsa_profile(record: &AlleleRecord, structures: &StructureMap) -> Option<RsaProfile> {
    if let Some(profile) = structures.get(&record.id) {
        return Some(profile.clone());
    }

    if let Some(ref rsa_values) = record.rsa {
        let profile = rsa_values.iter()
            .enumerate()
            .filter_map(|(idx, maybe_rsa)| {
                (*maybe_rsa).filter(|rsa| rsa.is_finite())
                    .map(|rsa| (idx + 1, rsa.clamp(0.0, 1.0)))
            })
            .collect();
        return Some(profile);
    }

    if let Some(ref asa_values) = record.asa {
        let profile = record.sequence.chars()
            .zip(asa_values.iter())
            .enumerate()
            .filter_map(|(idx, (residue, asa))| {
                asa_to_rsa(residue, *asa).map(|rsa| (idx + 1, rsa))
            })
            .collect();
        return Some(profile);
    }

    None
}

/// RSA values by alignment column (index 0 is column 1), gaps and
/// unknown residues are None
pub fn project_profile(aligned_seq: &str, profile: &RsaProfile) -> Vec<Option<f64>> {
    residue_numbering(aligned_seq).iter()
        .map(|maybe_pos| maybe_pos.and_then(|pos| profile.get(&pos).copied()))
        .collect()
}

/// Mean RSA per column over the given alleles that have a known value
pub fn group_scores(allele_ids: &[AlleleId], alignment: &AlignedSequences,
                    profiles: &HashMap<AlleleId, RsaProfile>)
    -> ClassGroupedScores
{
    let projected: Vec<Vec<Option<f64>>> = allele_ids.iter()
        .filter_map(|allele_id| {
            let aligned_seq = alignment.get(allele_id)?;
            let profile = profiles.get(allele_id)?;
            Some(project_profile(aligned_seq, profile))
        })
        .collect();

    (0..alignment_length(alignment))
        .map(|idx| {
            let known: Vec<f64> = projected.iter()
                .filter_map(|row| row.get(idx).copied().flatten())
                .collect();
            let rsa =
                if known.is_empty() {
                    None
                } else {
                    Some(known.iter().sum::<f64>() / known.len() as f64)
                };
            (idx + 1, GroupedScore { rsa, total: known.len() })
        })
        .collect()
}
