extern crate mhcmatch;

use std::collections::BTreeSet;

use mhcmatch::data_types::{EntityType, MhcClass};
use mhcmatch::pipeline::run_analysis;

mod util;

use util::{get_test_config, get_test_reference, make_submission, pig_and_macaque_submission};

fn set(residues: &str) -> BTreeSet<char> {
    residues.chars().collect()
}

#[test]
fn test_pig_and_macaque() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    let result = run_analysis(&reference, &config, &pig_and_macaque_submission(), "test-1")
        .unwrap();

    assert_eq!(result.classes_to_show, vec![MhcClass::ClassI]);
    assert!(result.invalid_alleles.is_empty());
    assert!(result.transformed_alleles.is_empty());

    assert_eq!(result.donors["pig1"].classified.get(MhcClass::ClassI).len(), 2);
    assert_eq!(result.alignment.len(), 3);
    assert_eq!(result.alignment["SLA-1*14:05"], "GSHSLRYFYTAVSRPGLGEP");
    assert_eq!(result.consensus[&MhcClass::ClassI], "GSHSLRYFYTAVSRPGRGEP");
    assert_eq!(result.consensus[&MhcClass::DRB], "");

    let record = &result.data["mamu1"]["pig1"][&MhcClass::ClassI];
    assert_eq!(record.donor_diff[1], set("P"));
    assert_eq!(record.donor_diff[4], set("L"));
    assert_eq!(record.donor_diff[16], set("L"));
    assert_eq!(record.donor_diff_score, 5);
    assert_eq!(record.recip_diff[4], set("M"));
    assert_eq!(record.recip_diff_score, 3);
    assert_eq!(record.all_donor_diff_counts[1][&'P'], 1);
    assert_eq!(record.all_donor_diff_ratios[1][&'P'], 0.5);
    assert_eq!(record.all_recip_diff_ratios[8][&'S'], 1.0);

    // L at column 5 and A at column 11 are buried in both pig alleles, L at
    // 17 has no structural data
    let updated_columns: Vec<usize> = record.updated_mismatches.iter()
        .enumerate()
        .filter(|(_, residues)| !residues.is_empty())
        .map(|(idx, _)| idx + 1)
        .collect();
    assert_eq!(updated_columns, vec![2, 9, 17]);
    assert_eq!(record.updated_mismatches_count, 3);
    assert_eq!(record.updated_recip_mismatches, record.recip_diff);

    let class_eplets = &result.eplets_found["mamu1"]["pig1"][&MhcClass::ClassI];
    assert_eq!(class_eplets.donor_diff.keys().collect::<Vec<_>>(), vec!["17L", "2P"]);
    let eplet_2p = &class_eplets.donor_diff["2P"];
    assert_eq!(eplet_2p.donors, vec!["SLA-1*08:05"]);
    assert_eq!(eplet_2p.recipients, vec!["Mamu-A1*022:01:01:01"]);
    assert_eq!(eplet_2p.mismatch_position, 2);
    assert_eq!((eplet_2p.min_pos, eplet_2p.max_pos), (1, 4));
    assert_eq!((class_eplets.donor_diff["17L"].min_pos, class_eplets.donor_diff["17L"].max_pos),
               (15, 19));

    assert_eq!(class_eplets.recip_diff.keys().collect::<Vec<_>>(), vec!["5M", "9S11S"]);
    let eplet_9s11s = &class_eplets.recip_diff["9S11S"];
    assert_eq!(eplet_9s11s.donors, vec!["SLA-1*14:05", "SLA-1*08:05"]);
    assert_eq!(eplet_9s11s.mismatch_position, 9);
    assert_eq!((eplet_9s11s.min_pos, eplet_9s11s.max_pos), (7, 13));

    let entries = &result.ranking["mamu1"].scores[&MhcClass::ClassI];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].donor_id, "pig1");
    assert_eq!(entries[0].score, Some(75.0));
    assert_eq!(entries[0].updated_score, Some(85.0));
    assert_eq!(entries[0].mismatches_recip, 3);
    assert_eq!(entries[0].total_sequence_length, 20);

    let info = &result.entity_info["SLA-1*14:05"];
    assert_eq!(info.linked_id, vec!["pig1"]);
    assert_eq!(info.seq_length, 20);
    assert_eq!(info.aligned_seq_length, 20);
    assert_eq!(info.rsa_scores[&17], None);
    assert!((info.rsa_scores[&2].unwrap() - 100.0 / 155.0).abs() < 1e-9);

    let pig_scores = &result.grouped_sas_scores["pig1"][&MhcClass::ClassI];
    assert_eq!(pig_scores[&2].total, 2);
    assert_eq!(pig_scores[&17].rsa, Some(0.2));
    assert_eq!(pig_scores[&17].total, 1);
    let mamu_scores = &result.grouped_sas_scores["mamu1"][&MhcClass::ClassI];
    assert!(mamu_scores.values().all(|score| score.rsa.is_none() && score.total == 0));

    assert_eq!(result.output_files.keys().collect::<Vec<_>>(),
               vec!["input", "alignment", "sas_scores", "mismatches", "eplets"]);
    assert_eq!(result.output_files["alignment"].csv.keys().collect::<Vec<_>>(), vec!["I"]);
}

#[test]
fn test_transformed_and_invalid_alleles() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    let submission = make_submission(&[
        ("d1", EntityType::Donor, &["SLA-1*14:05:02", "A*02:01:01:01G", "SLA-1*99:99",
                                    "X*01:01", "SLA-DQA*01:01"]),
        ("r1", EntityType::Recipient, &["SLA-2*05:02", "DRB1*01:01:01", "SLA-1*99:99"]),
        ("d2", EntityType::Donor, &["DRB1*03:01:01:01"]),
    ], 0.25);

    let result = run_analysis(&reference, &config, &submission, "test-2").unwrap();

    assert_eq!(result.transformed_alleles["SLA-1*14:05:02"], "SLA-1*14:05");
    assert_eq!(result.transformed_alleles["A*02:01:01:01G"], "A*02:01:01:01");
    assert_eq!(result.invalid_alleles, vec!["SLA-1*99:99", "X*01:01"]);
    assert!(!result.alignment.contains_key("SLA-1*99:99"));
    assert!(!result.alignment.contains_key("X*01:01"));
    assert!(!result.entity_info.contains_key("X*01:01"));

    let d1 = &result.donors["d1"];
    assert_eq!(d1.haplotype, vec!["SLA-1*14:05", "A*02:01:01:01", "SLA-DQA*01:01"]);
    assert_eq!(d1.classified.get(MhcClass::DQA), ["SLA-DQA*01:01"]);
    assert_eq!(result.donors.keys().collect::<Vec<_>>(), vec!["d1", "d2"]);

    assert_eq!(result.classes_to_show, vec![MhcClass::ClassI, MhcClass::DQA, MhcClass::DRB]);

    // r1 has nothing in DQA so there's no score to give
    let dqa_entries = &result.ranking["r1"].scores[&MhcClass::DQA];
    assert_eq!(dqa_entries.len(), 2);
    assert!(dqa_entries.iter().all(|entry| entry.score.is_none()));

    let drb_eplets = &result.eplets_found["r1"]["d2"][&MhcClass::DRB];
    assert_eq!(drb_eplets.donor_diff.keys().collect::<Vec<_>>(), vec!["9E"]);
    assert_eq!(drb_eplets.recip_diff.keys().collect::<Vec<_>>(), vec!["9W"]);

    // d1 has no DRB alleles
    assert!(result.data["r1"]["d1"][&MhcClass::DRB].donor_diff.is_empty());
    assert!(!result.eplets_found["r1"]["d1"].contains_key(&MhcClass::DRB));

    assert_eq!(result.output_files["input"].csv.keys().collect::<Vec<_>>(),
               vec!["I", "IIDQA", "IIDRB"]);
}

#[test]
fn test_rsa_threshold_limits() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    let mut submission = pig_and_macaque_submission();

    submission.rsa_threshold = 0.0;
    let result = run_analysis(&reference, &config, &submission, "test-3").unwrap();
    let record = &result.data["mamu1"]["pig1"][&MhcClass::ClassI];
    assert_eq!(record.updated_mismatches, record.donor_diff);

    // only the mismatch without structural data survives
    submission.rsa_threshold = 1.0;
    let result = run_analysis(&reference, &config, &submission, "test-4").unwrap();
    let record = &result.data["mamu1"]["pig1"][&MhcClass::ClassI];
    assert_eq!(record.updated_mismatches_count, 1);
    assert_eq!(record.updated_mismatches[16], set("L"));
    for (updated, initial) in record.updated_mismatches.iter().zip(record.donor_diff.iter()) {
        assert!(updated.is_subset(initial));
    }
}

#[test]
fn test_result_properties() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    let submission = make_submission(&[
        ("pig1", EntityType::Donor, &["SLA-1*14:05", "SLA-1*08:05", "SLA-2*05:02"]),
        ("pig2", EntityType::Donor, &["SLA-1*14:05", "DRB1*03:01:01:01"]),
        ("mamu1", EntityType::Recipient, &["Mamu-A1*022:01:01:01", "Mamu-B*001:01:01:01"]),
        ("hla1", EntityType::Recipient, &["A*02:01:01:01", "DRB1*01:01:01"]),
    ], 0.25);

    let result = run_analysis(&reference, &config, &submission, "test-5").unwrap();

    for class in &result.classes_to_show {
        let class_alleles: BTreeSet<&String> = result.donors.values()
            .chain(result.recipients.values())
            .flat_map(|entity| entity.classified.get(*class))
            .collect();
        let consensus = &result.consensus[class];

        for allele_id in class_alleles {
            assert_eq!(result.alignment[allele_id].chars().count(), consensus.chars().count());
            let ungapped: String = result.alignment[allele_id].chars()
                .filter(|c| *c != '-')
                .collect();
            assert_eq!(ungapped, reference.get_allele(allele_id).unwrap().sequence);
        }
    }

    for (recipient_id, by_donor) in &result.data {
        for (donor_id, by_class) in by_donor {
            for (class, record) in by_class {
                for (donor_set, recip_set) in record.donor_diff.iter().zip(&record.recip_diff) {
                    assert!(donor_set.is_disjoint(recip_set));
                }

                let entry = result.ranking[recipient_id].scores[class].iter()
                    .find(|entry| &entry.donor_id == donor_id)
                    .unwrap();
                assert_eq!(entry.mismatches_donor, record.donor_diff_score);
                if let Some(score) = entry.score {
                    assert!((0.0..=100.0).contains(&score));
                }
            }
        }
    }

    assert_eq!(result.ranking.keys().collect::<Vec<_>>(), vec!["mamu1", "hla1"]);
}

#[test]
fn test_record_asa_values() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    let record = reference.get_allele("Mamu-B*001:01:01:01").unwrap();
    let profile = reference.rsa_profile(record).unwrap();

    assert_eq!(profile[&1], 0.5);
    assert_eq!(profile[&5], 0.5);
    assert!(!profile.contains_key(&19));
    assert_eq!(profile.len(), 19);

    assert!(reference.rsa_profile(reference.get_allele("SLA-2*05:02").unwrap()).is_none());
}

#[test]
fn test_reference_consensus() {
    let config = get_test_config();
    let reference = get_test_reference(&config);

    // W and E tie at column 9
    assert_eq!(reference.consensus(MhcClass::DRB), "GDTRPRFLEQLKFECHFFNG");
    let distribution = reference.consensus_distribution(MhcClass::DRB).unwrap();
    assert_eq!(distribution[&9], (0.5, 'E'));
    assert_eq!(distribution[&1], (1.0, 'G'));

    assert_eq!(reference.consensus(MhcClass::DQA), "EDIVADHVASYGVNL");
    assert_eq!(reference.consensus(MhcClass::DRA), "");

    let allele_ids = reference.all_allele_ids();
    assert!(allele_ids.iter().any(|id| *id == "SLA-1*14:05"));
    assert!(!allele_ids.iter().any(|id| *id == "SLA-1*04:01"));
    assert!(!allele_ids.iter().any(|id| *id == "A*02:01:02"));
}
