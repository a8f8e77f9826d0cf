use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use tracing::warn;

use crate::bio::util::base_allele_name;
use crate::config::ClassificationRule;
use crate::data_types::{AlleleRecord, ClassifiedAlleles, Entity, EntityMap, EntityType,
                        MhcClass};
use crate::input::{RawEntity, Submission};
use crate::reference::ReferenceData;
use crate::types::AlleleId;

pub struct AlleleClassifier {
    rules: Vec<(Regex, MhcClass)>,
}

impl AlleleClassifier {
    pub fn new(rules: &[ClassificationRule]) -> Result<AlleleClassifier> {
        let rules = rules.iter()
            .map(|rule| {
                Regex::new(&rule.locus_pattern)
                    .with_context(|| format!("invalid locus pattern: {}", rule.locus_pattern))
                    .map(|re| (re, rule.class))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AlleleClassifier { rules })
    }

    pub fn classify(&self, record: &AlleleRecord) -> Option<MhcClass> {
        match record.allele_class.as_deref() {
            Some("I") => Some(MhcClass::ClassI),
            Some("II") => MhcClass::from_class_ii_locus(record.locus_name()),
            _ => {
                let locus = record.locus_name();
                self.rules.iter()
                    .find(|(re, _)| re.is_match(locus))
                    .map(|(_, class)| *class)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Exact(AlleleId),
    // the submitted name was replaced by a reference id
    Transformed(AlleleId),
    Invalid,
}

/// Find the reference allele for a submitted name: the exact id, then a
/// secondary name, then the best allele sharing the locus and the first
/// two fields
pub fn resolve_allele(reference: &ReferenceData, allele_name: &str) -> Resolution {
    if let Some(record) = reference.get_allele(allele_name) {
        if record.has_sequence() {
            return Resolution::Exact(record.id.clone());
        }
    }

    if let Some(canonical) = reference.canonical_for_secondary_name(allele_name) {
        if reference.get_allele(canonical).is_some_and(|record| record.has_sequence()) {
            return Resolution::Transformed(canonical.clone());
        }
    }

    if let Some(base_name) = base_allele_name(allele_name) {
        if let Some(best) = reference.best_match_for_base(&base_name) {
            return Resolution::Transformed(best.clone());
        }
    }

    Resolution::Invalid
}

#[derive(Clone, Debug, Default)]
pub struct NormalizedInput {
    pub donors: EntityMap,
    pub recipients: EntityMap,
    // submitted names that couldn't be resolved or classified
    pub invalid_alleles: Vec<String>,
    // submitted name to the reference id used instead
    pub transformed_alleles: IndexMap<String, AlleleId>,
}

impl NormalizedInput {
    fn add_invalid(&mut self, allele_name: &str) {
        if !self.invalid_alleles.iter().any(|name| name == allele_name) {
            self.invalid_alleles.push(allele_name.to_owned());
        }
    }

    fn normalize_entity(&mut self, reference: &ReferenceData, raw_entity: &RawEntity) -> Entity {
        let mut haplotype = vec![];
        let mut classified = ClassifiedAlleles::default();

        for allele_name in &raw_entity.alleles {
            let allele_id =
                match resolve_allele(reference, allele_name) {
                    Resolution::Exact(allele_id) => allele_id,
                    Resolution::Transformed(allele_id) => {
                        self.transformed_alleles.insert(allele_name.clone(), allele_id.clone());
                        allele_id
                    },
                    Resolution::Invalid => {
                        warn!("{} of {} is not a known allele", allele_name, raw_entity.identifier);
                        self.add_invalid(allele_name);
                        continue;
                    },
                };

            let maybe_class = reference.get_allele(&allele_id)
                .and_then(|record| reference.classify(record));

            let Some(class) = maybe_class else {
                warn!("{} of {} could not be classified", allele_name, raw_entity.identifier);
                self.add_invalid(allele_name);
                continue;
            };

            classified.insert(class, &allele_id);
            haplotype.push(allele_id);
        }

        Entity {
            identifier: raw_entity.identifier.clone(),
            entity_type: raw_entity.entity_type,
            haplotype,
            classified,
        }
    }

    /// Classes in which at least one donor or recipient has an allele
    pub fn classes_to_show(&self) -> Vec<MhcClass> {
        MhcClass::ALL.iter()
            .filter(|class| {
                self.donors.values().chain(self.recipients.values())
                    .any(|entity| !entity.classified.get(**class).is_empty())
            })
            .copied()
            .collect()
    }
}

pub fn normalize(submission: &Submission, reference: &ReferenceData) -> NormalizedInput {
    let mut normalized = NormalizedInput::default();

    for raw_entity in &submission.entities {
        let entity = normalized.normalize_entity(reference, raw_entity);

        let entities =
            match entity.entity_type {
                EntityType::Donor => &mut normalized.donors,
                EntityType::Recipient => &mut normalized.recipients,
            };

        entities.insert(entity.identifier.clone(), entity);
    }

    normalized
}
