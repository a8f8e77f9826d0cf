use itertools::Itertools;

use crate::constants::GAP_CHAR;
use crate::types::ResiduePosition;

// "A*01:01:01:01" -> "A*01:01", returns None for names without a '*'
pub fn base_allele_name(allele_name: &str) -> Option<String> {
    let (locus, fields) = allele_name.split_once('*')?;

    if locus.is_empty() || fields.is_empty() {
        return None;
    }

    Some(format!("{}*{}", locus, fields.split(':').take(2).join(":")))
}

// for each column of an aligned row, the 1-based residue number of the
// residue in that column or None for a gap
pub fn residue_numbering(aligned_seq: &str) -> Vec<Option<ResiduePosition>> {
    let mut residue_number = 0;

    aligned_seq.chars()
        .map(|c| {
            if c == GAP_CHAR {
                None
            } else {
                residue_number += 1;
                Some(residue_number)
            }
        })
        .collect()
}

pub fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[test]
fn test_base_allele_name() {
    assert_eq!(base_allele_name("A*01:01:01:01").unwrap(), "A*01:01");
    assert_eq!(base_allele_name("Mamu-A1*022:01:01:01").unwrap(), "Mamu-A1*022:01");
    assert_eq!(base_allele_name("SLA-1*14:05").unwrap(), "SLA-1*14:05");
    assert_eq!(base_allele_name("DRB*01").unwrap(), "DRB*01");
    assert!(base_allele_name("A0101").is_none());
    assert!(base_allele_name("*01:01").is_none());
}

#[test]
fn test_residue_numbering() {
    assert_eq!(residue_numbering("A-CD-"),
               vec![Some(1), None, Some(2), Some(3), None]);
    assert!(residue_numbering("").is_empty());
}

#[test]
fn test_round_2dp() {
    assert_eq!(round_2dp(66.666666), 66.67);
    assert_eq!(round_2dp(100.0), 100.0);
}
