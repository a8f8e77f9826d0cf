use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::ABANDONED_STATUS;
use crate::types::*;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MhcClass {
#[serde(rename = "I")]
    ClassI,
#[serde(rename = "IIDQA")]
    DQA,
#[serde(rename = "IIDQB")]
    DQB,
#[serde(rename = "IIDRA")]
    DRA,
#[serde(rename = "IIDRB")]
    DRB,
}

impl MhcClass {
    pub const ALL: [MhcClass; 5] =
        [MhcClass::ClassI, MhcClass::DQA, MhcClass::DQB, MhcClass::DRA, MhcClass::DRB];

    pub fn as_str(&self) -> &'static str {
        match self {
            MhcClass::ClassI => "I",
            MhcClass::DQA => "IIDQA",
            MhcClass::DQB => "IIDQB",
            MhcClass::DRA => "IIDRA",
            MhcClass::DRB => "IIDRB",
        }
    }

    // the class II class for a locus name like "HLA-DQB1" or "DRB"
    pub fn from_class_ii_locus(locus: &str) -> Option<MhcClass> {
        if locus.contains("DQA") {
            Some(MhcClass::DQA)
        } else if locus.contains("DQB") {
            Some(MhcClass::DQB)
        } else if locus.contains("DRA") {
            Some(MhcClass::DRA)
        } else if locus.contains("DRB") {
            Some(MhcClass::DRB)
        } else {
            None
        }
    }
}

impl Display for MhcClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MhcClass {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MhcClass::ALL.iter()
            .find(|class| class.as_str() == value)
            .copied()
            .ok_or_else(|| format!("Invalid allele class: {}", value))
    }
}

// eplet registries are split by locus group, DQA and DQB share one
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EpletGroup {
#[serde(rename = "I")]
    ClassI,
#[serde(rename = "IIDRB")]
    DRB,
#[serde(rename = "IIDQ")]
    DQ,
}

impl EpletGroup {
    pub fn for_class(class: MhcClass) -> Option<EpletGroup> {
        match class {
            MhcClass::ClassI => Some(EpletGroup::ClassI),
            MhcClass::DRB => Some(EpletGroup::DRB),
            MhcClass::DQA | MhcClass::DQB => Some(EpletGroup::DQ),
            MhcClass::DRA => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityType {
    Donor,
    Recipient,
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntityType::Donor => write!(f, "Donor"),
            EntityType::Recipient => write!(f, "Recipient"),
        }
    }
}

impl TryFrom<&str> for EntityType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "Donor" => Ok(EntityType::Donor),
            "Recipient" => Ok(EntityType::Recipient),
            _ => Err(format!("The type must be Donor or Recipient, not: {}", value)),
        }
    }
}

// every class is always present as a key, possibly with no alleles
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct ClassifiedAlleles(BTreeMap<MhcClass, Vec<AlleleId>>);

impl Default for ClassifiedAlleles {
    fn default() -> Self {
        ClassifiedAlleles(MhcClass::ALL.iter().map(|class| (*class, vec![])).collect())
    }
}

impl ClassifiedAlleles {
    pub fn get(&self, class: MhcClass) -> &[AlleleId] {
        self.0.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    // returns false if the allele was already present for the class
    pub fn insert(&mut self, class: MhcClass, allele_id: &str) -> bool {
        let alleles = self.0.entry(class).or_default();
        if alleles.iter().any(|existing| existing == allele_id) {
            false
        } else {
            alleles.push(allele_id.to_owned());
            true
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MhcClass, &Vec<AlleleId>)> {
        self.0.iter()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Entity {
    pub identifier: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(rename = "Haplotype")]
    pub haplotype: Vec<AlleleId>,
    pub classified: ClassifiedAlleles,
}

pub type EntityMap = IndexMap<EntityId, Entity>;

// A record from the reference allele table.  Attributes not named here
// are kept in "extra" and returned by the allele lookup unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AlleleRecord {
    #[serde(default, alias = "_id")]
    pub id: AlleleId,
    #[serde(default)]
    pub sequence: String,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub accession: Option<String>,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub status: Option<String>,
    #[serde(skip_serializing_if="Vec::is_empty", default)]
    pub secondary_names: Vec<String>,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub allele_class: Option<String>,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub locus: Option<String>,
    // relative accessibility per residue, already in [0,1]
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub rsa: Option<Vec<Option<f64>>>,
    // absolute accessibility per residue in Å²
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub asa: Option<Vec<Option<f64>>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AlleleRecord {
    pub fn is_abandoned(&self) -> bool {
        self.status.as_deref() == Some(ABANDONED_STATUS)
    }

    pub fn has_sequence(&self) -> bool {
        !self.sequence.is_empty() && self.sequence != "X"
    }

    // a usable allele can be a resolution target and can be aligned
    pub fn is_usable(&self) -> bool {
        !self.is_abandoned() && self.has_sequence()
    }

    // the explicit locus or the part of the name before the '*'
    pub fn locus_name(&self) -> &str {
        if let Some(ref locus) = self.locus {
            locus
        } else {
            self.id.split('*').next().unwrap_or(&self.id)
        }
    }
}

pub type EpletResidues = BTreeMap<ResiduePosition, Residue>;
pub type EpletTable = BTreeMap<EpletGroup, BTreeMap<EpletId, EpletResidues>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EntityInfo {
    pub linked_id: Vec<EntityId>,
    pub seq: String,
    pub seq_length: usize,
    pub aligned_seq: String,
    pub aligned_seq_length: usize,
    // by alignment column, None for gaps and unknown values
    pub rsa_scores: BTreeMap<Column, Option<f64>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GroupedScore {
    pub rsa: Option<f64>,
    pub total: usize,
}

pub type ClassGroupedScores = BTreeMap<Column, GroupedScore>;
pub type GroupedSasScores = IndexMap<EntityId, BTreeMap<MhcClass, ClassGroupedScores>>;

pub type ResidueSet = BTreeSet<Residue>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct MismatchRecord {
    pub donor_diff: Vec<ResidueSet>,
    pub recip_diff: Vec<ResidueSet>,
    pub donor_diff_score: usize,
    pub recip_diff_score: usize,
    pub all_donor_diff_counts: Vec<BTreeMap<Residue, usize>>,
    pub all_donor_diff_ratios: Vec<BTreeMap<Residue, f64>>,
    pub all_recip_diff_counts: Vec<BTreeMap<Residue, usize>>,
    pub all_recip_diff_ratios: Vec<BTreeMap<Residue, f64>>,
    pub updated_mismatches: Vec<ResidueSet>,
    pub updated_mismatches_count: usize,
    pub updated_recip_mismatches: Vec<ResidueSet>,
    pub updated_recip_mismatches_count: usize,
}

// recipient -> donor -> class
pub type MismatchMap = IndexMap<EntityId, IndexMap<EntityId, BTreeMap<MhcClass, MismatchRecord>>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EpletMatch {
    pub donors: Vec<AlleleId>,
    pub recipients: Vec<AlleleId>,
    pub mismatch_position: Column,
    pub min_pos: Column,
    pub max_pos: Column,
    pub eplet_data: EpletResidues,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ClassEplets {
    pub donor_diff: BTreeMap<EpletId, EpletMatch>,
    pub recip_diff: BTreeMap<EpletId, EpletMatch>,
}

impl ClassEplets {
    pub fn is_empty(&self) -> bool {
        self.donor_diff.is_empty() && self.recip_diff.is_empty()
    }
}

// recipient -> donor -> class, classes without eplets are left out
pub type EpletsFound = IndexMap<EntityId, IndexMap<EntityId, BTreeMap<MhcClass, ClassEplets>>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RankingEntry {
    #[serde(rename = "donorID")]
    pub donor_id: EntityId,
    pub score: Option<f64>,
    pub mismatches_donor: usize,
    pub mismatches_recip: usize,
    pub updated_mismatches_donor: usize,
    pub updated_mismatches_recip: usize,
    pub total_sequence_length: usize,
    pub updated_score: Option<f64>,
    pub updated_mismatches: Vec<ResidueSet>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecipientRanking {
    #[serde(rename = "recipientID")]
    pub recipient_id: EntityId,
    pub scores: BTreeMap<MhcClass, Vec<RankingEntry>>,
}

pub type Ranking = IndexMap<EntityId, RecipientRanking>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExportFile {
    // base64 encoded xlsx workbook
    pub excel: String,
    // sheet name to base64 encoded CSV
    pub csv: IndexMap<SheetName, String>,
}

pub type OutputFiles = IndexMap<String, ExportFile>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    pub entity_info: BTreeMap<AlleleId, EntityInfo>,
    pub execution_time: f64,
    pub classes_to_show: Vec<MhcClass>,
    pub donors: EntityMap,
    pub recipients: EntityMap,
    pub alignment: BTreeMap<AlleleId, String>,
    pub consensus: BTreeMap<MhcClass, String>,
    pub data: MismatchMap,
    pub eplets_found: EpletsFound,
    pub ranking: Ranking,
    pub invalid_alleles: Vec<String>,
    pub transformed_alleles: IndexMap<String, AlleleId>,
    pub output_files: OutputFiles,
    pub grouped_sas_scores: GroupedSasScores,
}
