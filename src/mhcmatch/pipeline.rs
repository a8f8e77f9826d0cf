use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::info;

use crate::bio::alignment::{align_sequences, alignment_length, consensus, AlignedSequences};
use crate::bio::eplets::EpletSearch;
use crate::bio::mismatch::compare_class;
use crate::bio::ranking::make_ranking;
use crate::bio::solvent_accessibility::{group_scores, project_profile, RsaProfile};
use crate::config::Config;
use crate::data_types::{AnalysisResult, Entity, EntityInfo, EntityMap, EpletsFound,
                        GroupedSasScores, MhcClass, MismatchMap};
use crate::export::make_output_files;
use crate::input::Submission;
use crate::normalize::normalize;
use crate::reference::ReferenceData;
use crate::types::AlleleId;

type ClassAlignments = BTreeMap<MhcClass, AlignedSequences>;
type ProfileMap = HashMap<AlleleId, RsaProfile>;

fn all_entities<'a>(donors: &'a EntityMap, recipients: &'a EntityMap)
    -> impl Iterator<Item = &'a Entity>
{
    donors.values().chain(recipients.values())
}

// one alignment per class over the distinct alleles any entity uses
fn align_classes(reference: &ReferenceData, config: &Config, donors: &EntityMap,
                 recipients: &EntityMap)
    -> ClassAlignments
{
    MhcClass::ALL.iter()
        .map(|class| {
            let allele_ids: BTreeSet<&AlleleId> = all_entities(donors, recipients)
                .flat_map(|entity| entity.classified.get(*class))
                .collect();

            let sequences: BTreeMap<AlleleId, String> = allele_ids.into_iter()
                .filter_map(|allele_id| {
                    reference.get_allele(allele_id)
                        .map(|record| (allele_id.clone(), record.sequence.clone()))
                })
                .collect();

            (*class, align_sequences(&sequences, &config.alignment))
        })
        .collect()
}

fn make_profiles(reference: &ReferenceData, class_alignments: &ClassAlignments) -> ProfileMap {
    class_alignments.values()
        .flat_map(|alignment| alignment.keys())
        .filter_map(|allele_id| {
            let record = reference.get_allele(allele_id)?;
            let profile = reference.rsa_profile(record)?;
            Some((allele_id.clone(), profile))
        })
        .collect()
}

fn make_entity_info(reference: &ReferenceData, class_alignments: &ClassAlignments,
                    profiles: &ProfileMap, donors: &EntityMap, recipients: &EntityMap)
    -> BTreeMap<AlleleId, EntityInfo>
{
    let mut entity_info = BTreeMap::new();

    for (allele_id, aligned_seq) in class_alignments.values().flatten() {
        let seq = reference.get_allele(allele_id)
            .map(|record| record.sequence.clone())
            .unwrap_or_default();

        let linked_id = all_entities(donors, recipients)
            .filter(|entity| entity.haplotype.contains(allele_id))
            .map(|entity| entity.identifier.clone())
            .collect();

        let rsa_scores =
            match profiles.get(allele_id) {
                Some(profile) => {
                    project_profile(aligned_seq, profile).into_iter()
                        .enumerate()
                        .map(|(idx, maybe_rsa)| (idx + 1, maybe_rsa))
                        .collect()
                },
                None => BTreeMap::new(),
            };

        entity_info.insert(allele_id.clone(), EntityInfo {
            linked_id,
            seq_length: seq.chars().count(),
            seq,
            aligned_seq_length: aligned_seq.chars().count(),
            aligned_seq: aligned_seq.clone(),
            rsa_scores,
        });
    }

    entity_info
}

fn make_grouped_scores(class_alignments: &ClassAlignments, profiles: &ProfileMap,
                       classes_to_show: &[MhcClass], donors: &EntityMap,
                       recipients: &EntityMap)
    -> GroupedSasScores
{
    all_entities(donors, recipients)
        .map(|entity| {
            let by_class = classes_to_show.iter()
                .filter_map(|class| {
                    let alignment = class_alignments.get(class)?;
                    let scores = group_scores(entity.classified.get(*class), alignment, profiles);
                    Some((*class, scores))
                })
                .collect();
            (entity.identifier.clone(), by_class)
        })
        .collect()
}

fn compare_entities(class_alignments: &ClassAlignments, profiles: &ProfileMap,
                    classes_to_show: &[MhcClass], donors: &EntityMap, recipients: &EntityMap,
                    rsa_threshold: f64)
    -> MismatchMap
{
    let empty_alignment = AlignedSequences::new();

    recipients.values()
        .map(|recipient| {
            let by_donor = donors.values()
                .map(|donor| {
                    let by_class = classes_to_show.iter()
                        .map(|class| {
                            let alignment = class_alignments.get(class)
                                .unwrap_or(&empty_alignment);
                            let record = compare_class(donor.classified.get(*class),
                                                       recipient.classified.get(*class),
                                                       alignment, profiles, rsa_threshold);
                            (*class, record)
                        })
                        .collect();
                    (donor.identifier.clone(), by_class)
                })
                .collect();
            (recipient.identifier.clone(), by_donor)
        })
        .collect()
}

fn find_eplets(reference: &ReferenceData, config: &Config, class_alignments: &ClassAlignments,
               mismatches: &MismatchMap, classes_to_show: &[MhcClass], donors: &EntityMap,
               recipients: &EntityMap)
    -> EpletsFound
{
    let searches: BTreeMap<MhcClass, EpletSearch<'_>> = classes_to_show.iter()
        .filter_map(|class| {
            let eplets = reference.class_eplets(*class)?;
            let alignment = class_alignments.get(class)?;
            Some((*class, EpletSearch::new(alignment, eplets,
                                           config.analysis.eplet_window_buffer)))
        })
        .collect();

    let mut eplets_found: EpletsFound = IndexMap::new();

    for (recipient_id, by_donor) in mismatches {
        let Some(recipient) = recipients.get(recipient_id) else {
            continue;
        };
        let recipient_found = eplets_found.entry(recipient_id.clone()).or_default();

        for (donor_id, by_class) in by_donor {
            let Some(donor) = donors.get(donor_id) else {
                continue;
            };
            let donor_found = recipient_found.entry(donor_id.clone()).or_default();

            for (class, record) in by_class {
                let Some(search) = searches.get(class) else {
                    continue;
                };

                let class_eplets = search.class_eplets(record, donor.classified.get(*class),
                                                       recipient.classified.get(*class));
                if !class_eplets.is_empty() {
                    donor_found.insert(*class, class_eplets);
                }
            }
        }
    }

    eplets_found
}

/// Run every analysis stage for one submission
pub fn run_analysis(reference: &ReferenceData, config: &Config, submission: &Submission,
                    job_id: &str)
    -> Result<AnalysisResult>
{
    let start_time = Instant::now();

    let normalized = normalize(submission, reference);
    let classes_to_show = normalized.classes_to_show();
    info!("job {}: normalized {} donors and {} recipients, {} invalid alleles",
          job_id, normalized.donors.len(), normalized.recipients.len(),
          normalized.invalid_alleles.len());

    let donors = &normalized.donors;
    let recipients = &normalized.recipients;

    let class_alignments = align_classes(reference, config, donors, recipients);

    let alignment: BTreeMap<AlleleId, String> = class_alignments.values()
        .flat_map(|class_alignment| class_alignment.clone())
        .collect();
    let consensus_seqs: BTreeMap<MhcClass, String> = class_alignments.iter()
        .map(|(class, class_alignment)| (*class, consensus(class_alignment)))
        .collect();
    let alignment_lengths: BTreeMap<MhcClass, usize> = class_alignments.iter()
        .map(|(class, class_alignment)| (*class, alignment_length(class_alignment)))
        .collect();
    info!("job {}: aligned {} alleles", job_id, alignment.len());

    let profiles = make_profiles(reference, &class_alignments);
    let entity_info =
        make_entity_info(reference, &class_alignments, &profiles, donors, recipients);
    let grouped_sas_scores =
        make_grouped_scores(&class_alignments, &profiles, &classes_to_show, donors, recipients);
    info!("job {}: found RSA profiles for {} alleles", job_id, profiles.len());

    let data = compare_entities(&class_alignments, &profiles, &classes_to_show, donors,
                                recipients, submission.rsa_threshold);
    let eplets_found = find_eplets(reference, config, &class_alignments, &data,
                                   &classes_to_show, donors, recipients);
    info!("job {}: compared {} recipients with {} donors", job_id, recipients.len(),
          donors.len());

    let ranking = make_ranking(donors, recipients, &data, &classes_to_show, &alignment_lengths);

    let mut result = AnalysisResult {
        entity_info,
        execution_time: 0.0,
        classes_to_show,
        donors: normalized.donors.clone(),
        recipients: normalized.recipients.clone(),
        alignment,
        consensus: consensus_seqs,
        data,
        eplets_found,
        ranking,
        invalid_alleles: normalized.invalid_alleles.clone(),
        transformed_alleles: normalized.transformed_alleles.clone(),
        output_files: IndexMap::new(),
        grouped_sas_scores,
    };

    result.output_files = make_output_files(&result)
        .with_context(|| format!("failed to create export files for job {}", job_id))?;

    result.execution_time = start_time.elapsed().as_secs_f64();
    info!("job {}: finished in {:.3}s", job_id, result.execution_time);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::data_types::EntityType;
    use crate::input::RawEntity;
    use crate::reference::read_alleles;

    fn make_reference() -> ReferenceData {
        let alleles = read_alleles(r#"[
          {"_id": "A*01:01", "sequence": "GSHSMRYF", "allele_class": "I",
           "rsa": [0.9, 0.8, 0.1, 0.7, 0.6, 0.5, 0.4, 0.3]},
          {"_id": "A*02:01", "sequence": "GSHSMKYF", "allele_class": "I"},
          {"_id": "DRB1*01:01", "sequence": "GDTRPRF", "allele_class": "II", "locus": "DRB1"}
        ]"#.as_bytes()).unwrap();
        let eplets = serde_json::from_str(r#"{"I": {"6R": {"6": "R"}}}"#).unwrap();
        ReferenceData::new(&Config::default(), alleles, eplets, HashMap::new()).unwrap()
    }

    fn raw(identifier: &str, entity_type: EntityType, alleles: &[&str]) -> RawEntity {
        RawEntity {
            identifier: identifier.to_owned(),
            entity_type,
            alleles: alleles.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_run_analysis() {
        let reference = make_reference();
        let submission = Submission {
            entities: vec![
                raw("d1", EntityType::Donor, &["A*01:01", "DRB1*01:01"]),
                raw("r1", EntityType::Recipient, &["A*02:01", "B*99:99"]),
            ],
            rsa_threshold: 0.25,
        };

        let result = run_analysis(&reference, &Config::default(), &submission, "test").unwrap();

        assert_eq!(result.classes_to_show, vec![MhcClass::ClassI, MhcClass::DRB]);
        assert_eq!(result.invalid_alleles, vec!["B*99:99"]);
        assert_eq!(result.alignment.len(), 3);
        assert_eq!(result.consensus[&MhcClass::DRB], "GDTRPRF");
        assert_eq!(result.consensus[&MhcClass::DQA], "");

        let record = &result.data["r1"]["d1"][&MhcClass::ClassI];
        assert_eq!(record.donor_diff_score, 1);
        assert_eq!(record.donor_diff[5], BTreeSet::from(['R']));
        assert_eq!(record.updated_mismatches[5], BTreeSet::from(['R']));

        // the recipient has no DRB alleles
        let drb_record = &result.data["r1"]["d1"][&MhcClass::DRB];
        assert!(drb_record.donor_diff.is_empty());

        let eplet = &result.eplets_found["r1"]["d1"][&MhcClass::ClassI].donor_diff["6R"];
        assert_eq!(eplet.mismatch_position, 6);
        assert_eq!((eplet.min_pos, eplet.max_pos), (4, 8));

        let entries = &result.ranking["r1"].scores[&MhcClass::ClassI];
        assert_eq!(entries[0].score, Some(87.5));
        assert_eq!(result.ranking["r1"].scores[&MhcClass::DRB][0].score, None);

        let info = &result.entity_info["A*01:01"];
        assert_eq!(info.linked_id, vec!["d1"]);
        assert_eq!(info.rsa_scores[&3], Some(0.1));
        assert!(result.entity_info["A*02:01"].rsa_scores.is_empty());

        let d1_scores = &result.grouped_sas_scores["d1"][&MhcClass::ClassI];
        assert_eq!(d1_scores[&1].rsa, Some(0.9));
        assert_eq!(result.grouped_sas_scores["r1"][&MhcClass::ClassI][&1].total, 0);

        assert_eq!(result.output_files.len(), 5);
        assert!(result.execution_time >= 0.0);
    }
}
