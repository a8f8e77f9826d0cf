use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{info, warn};
use zstd::stream::Decoder;

use crate::bio::alignment::{align_sequences, consensus, consensus_distribution,
                            ConsensusDistribution};
use crate::bio::eplets::{eplets_from_file, eplets_in_sequence, GroupEplets};
use crate::bio::solvent_accessibility::{rsa_profile, structures_from_file, RsaProfile,
                                        StructureMap};
use crate::config::{AlignmentConfig, Config};
use crate::data_types::{AlleleRecord, EpletGroup, EpletTable, MhcClass};
use crate::normalize::AlleleClassifier;
use crate::types::{AlleleId, EpletId};

pub type AlleleMap = BTreeMap<AlleleId, AlleleRecord>;

// the allele table is either a list of records or a map keyed by id
#[derive(Deserialize)]
#[serde(untagged)]
enum AlleleFile {
    List(Vec<AlleleRecord>),
    Map(BTreeMap<AlleleId, AlleleRecord>),
}

/// Open a reference file, decompressing ".zst" and ".gz" files
pub fn open_data_file(file_name: &str) -> Result<Box<dyn Read>> {
    let file = File::open(file_name)
        .with_context(|| format!("failed to read {}", file_name))?;
    let reader = BufReader::new(file);

    if file_name.ends_with(".zst") {
        let decoder = Decoder::new(reader)
            .with_context(|| format!("failed to start decompressing {}", file_name))?;
        Ok(Box::new(decoder))
    } else if file_name.ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

pub fn read_alleles<R: Read>(mut source: R) -> Result<AlleleMap> {
    let mut json = String::new();
    source.read_to_string(&mut json)?;

    let allele_file: AlleleFile = serde_json::from_str(&json)?;

    let records: Vec<AlleleRecord> =
        match allele_file {
            AlleleFile::List(records) => records,
            AlleleFile::Map(map) => {
                map.into_iter()
                    .map(|(allele_id, mut record)| {
                        if record.id.is_empty() {
                            record.id = allele_id;
                        }
                        record
                    })
                    .collect()
            },
        };

    let mut alleles = BTreeMap::new();

    for record in records {
        if record.id.is_empty() {
            warn!("skipping allele record without an id");
            continue;
        }
        alleles.insert(record.id.clone(), record);
    }

    Ok(alleles)
}

pub fn alleles_from_file(file_name: &str) -> Result<AlleleMap> {
    let source = open_data_file(file_name)?;
    read_alleles(source).with_context(|| format!("failed to parse {}", file_name))
}

struct ClassConsensus {
    sequence: String,
    distribution: ConsensusDistribution,
}

/// Reference alleles, eplets and structural data.  Loaded once before the
/// server starts and never changed.  The consensus of a class is aligned
/// the first time it's asked for.
pub struct ReferenceData {
    alleles: AlleleMap,
    secondary_names: HashMap<String, AlleleId>,
    eplets: EpletTable,
    structures: StructureMap,
    classifier: AlleleClassifier,
    alignment_config: AlignmentConfig,
    class_sequences: BTreeMap<MhcClass, BTreeMap<AlleleId, String>>,
    consensus_cache: BTreeMap<MhcClass, OnceLock<ClassConsensus>>,
}

impl ReferenceData {
    pub fn new(config: &Config, alleles: AlleleMap, eplets: EpletTable,
               structures: StructureMap)
        -> Result<ReferenceData>
    {
        let classifier = AlleleClassifier::new(&config.classification_rules)?;

        let mut secondary_names = HashMap::new();
        for record in alleles.values() {
            for secondary_name in &record.secondary_names {
                if alleles.contains_key(secondary_name) {
                    continue;
                }
                secondary_names.insert(secondary_name.clone(), record.id.clone());
            }
        }

        let mut class_sequences: BTreeMap<MhcClass, BTreeMap<AlleleId, String>> = BTreeMap::new();
        for record in alleles.values().filter(|record| record.is_usable()) {
            if let Some(class) = classifier.classify(record) {
                class_sequences.entry(class)
                    .or_default()
                    .insert(record.id.clone(), record.sequence.clone());
            }
        }

        let consensus_cache = MhcClass::ALL.into_iter()
            .map(|class| (class, OnceLock::new()))
            .collect();

        Ok(ReferenceData {
            alleles,
            secondary_names,
            eplets,
            structures,
            classifier,
            alignment_config: config.alignment,
            class_sequences,
            consensus_cache,
        })
    }

    pub fn from_files(config: &Config, alleles_file_name: &str,
                      maybe_eplets_file_name: Option<&str>,
                      maybe_structures_file_name: Option<&str>)
        -> Result<ReferenceData>
    {
        let alleles = alleles_from_file(alleles_file_name)?;
        info!("loaded {} reference alleles from {}", alleles.len(), alleles_file_name);

        let eplets =
            if let Some(eplets_file_name) = maybe_eplets_file_name {
                eplets_from_file(eplets_file_name)?
            } else {
                BTreeMap::new()
            };

        let structures =
            if let Some(structures_file_name) = maybe_structures_file_name {
                structures_from_file(structures_file_name)?
            } else {
                HashMap::new()
            };

        ReferenceData::new(config, alleles, eplets, structures)
    }

    pub fn get_allele(&self, allele_id: &str) -> Option<&AlleleRecord> {
        self.alleles.get(allele_id)
    }

    pub fn canonical_for_secondary_name(&self, name: &str) -> Option<&AlleleId> {
        self.secondary_names.get(name)
    }

    // the shortest usable id containing the base name, ties go to the
    // lexicographically smallest id
    pub fn best_match_for_base(&self, base_name: &str) -> Option<&AlleleId> {
        self.alleles.values()
            .filter(|record| record.is_usable() && record.id.contains(base_name))
            .map(|record| &record.id)
            .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
    }

    pub fn all_allele_ids(&self) -> Vec<&AlleleId> {
        self.alleles.values()
            .filter(|record| record.is_usable())
            .map(|record| &record.id)
            .collect()
    }

    pub fn classify(&self, record: &AlleleRecord) -> Option<MhcClass> {
        self.classifier.classify(record)
    }

    pub fn class_eplets(&self, class: MhcClass) -> Option<&GroupEplets> {
        EpletGroup::for_class(class).and_then(|group| self.eplets.get(&group))
    }

    // None if the allele isn't known
    pub fn eplets_of_allele(&self, allele_id: &str) -> Option<Vec<EpletId>> {
        let record = self.get_allele(allele_id)?;

        let eplet_ids = self.classify(record)
            .and_then(|class| self.class_eplets(class))
            .map(|eplets| eplets_in_sequence(&record.sequence, eplets))
            .unwrap_or_default();

        Some(eplet_ids)
    }

    pub fn rsa_profile(&self, record: &AlleleRecord) -> Option<RsaProfile> {
        rsa_profile(record, &self.structures)
    }

    fn class_consensus(&self, class: MhcClass) -> Option<&ClassConsensus> {
        let cell = self.consensus_cache.get(&class)?;

        Some(cell.get_or_init(|| {
            let alignment =
                match self.class_sequences.get(&class) {
                    Some(sequences) => align_sequences(sequences, &self.alignment_config),
                    None => BTreeMap::new(),
                };

            info!("reference consensus for class {} from {} alleles", class, alignment.len());

            ClassConsensus {
                sequence: consensus(&alignment),
                distribution: consensus_distribution(&alignment),
            }
        }))
    }

    /// The consensus of the usable reference alleles of a class.  Slow the
    /// first time for each class so call it from a blocking thread.
    pub fn consensus(&self, class: MhcClass) -> &str {
        self.class_consensus(class)
            .map(|class_consensus| class_consensus.sequence.as_str())
            .unwrap_or("")
    }

    pub fn consensus_distribution(&self, class: MhcClass) -> Option<&ConsensusDistribution> {
        self.class_consensus(class)
            .map(|class_consensus| &class_consensus.distribution)
    }
}
