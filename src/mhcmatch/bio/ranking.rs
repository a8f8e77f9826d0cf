use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt;

use crate::bio::mismatch::non_empty_count;
use crate::bio::util::round_2dp;
use crate::data_types::{EntityMap, MhcClass, MismatchMap, MismatchRecord, Ranking,
                        RankingEntry, RecipientRanking};
use crate::types::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    MismatchesDonor,
    MismatchesRecip,
    UpdatedMismatchesDonor,
    UpdatedMismatchesRecip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl SortField {
    fn value(&self, entry: &RankingEntry) -> usize {
        match self {
            SortField::MismatchesDonor => entry.mismatches_donor,
            SortField::MismatchesRecip => entry.mismatches_recip,
            SortField::UpdatedMismatchesDonor => entry.updated_mismatches_donor,
            SortField::UpdatedMismatchesRecip => entry.updated_mismatches_recip,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortField::MismatchesDonor => "mismatches_donor",
            SortField::MismatchesRecip => "mismatches_recip",
            SortField::UpdatedMismatchesDonor => "updated_mismatches_donor",
            SortField::UpdatedMismatchesRecip => "updated_mismatches_recip",
        }
    }
}

impl Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.field.as_str())?;
        if self.descending {
            write!(f, "-desc")?;
        }
        Ok(())
    }
}

// "updated_mismatches_donor" or "updated_mismatches_donor-desc"
impl TryFrom<&str> for SortKey {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let (field_name, descending) =
            match value.strip_suffix("-desc") {
                Some(field_name) => (field_name, true),
                None => (value, false),
            };

        let field = match field_name {
            "mismatches_donor" => SortField::MismatchesDonor,
            "mismatches_recip" => SortField::MismatchesRecip,
            "updated_mismatches_donor" => SortField::UpdatedMismatchesDonor,
            "updated_mismatches_recip" => SortField::UpdatedMismatchesRecip,
            _ => return Err(format!("Invalid sort key: {}", value)),
        };

        Ok(SortKey { field, descending })
    }
}

// percent identity over the alignment, None if the recipient has nothing
// to compare in the class
fn percent_score(mismatch_count: usize, total_length: usize, recipient_has_alleles: bool)
    -> Option<f64>
{
    if !recipient_has_alleles {
        return None;
    }

    if total_length == 0 {
        return Some(100.0);
    }

    Some(round_2dp(100.0 - 100.0 * mismatch_count as f64 / total_length as f64))
}

pub fn ranking_entry(donor_id: &EntityId, record: &MismatchRecord,
                     total_sequence_length: usize, recipient_has_alleles: bool)
    -> RankingEntry
{
    let mismatches_donor = non_empty_count(&record.donor_diff);
    let updated_mismatches_donor = non_empty_count(&record.updated_mismatches);

    RankingEntry {
        donor_id: donor_id.clone(),
        score: percent_score(mismatches_donor, total_sequence_length, recipient_has_alleles),
        mismatches_donor,
        mismatches_recip: non_empty_count(&record.recip_diff),
        updated_mismatches_donor,
        updated_mismatches_recip: non_empty_count(&record.updated_recip_mismatches),
        total_sequence_length,
        updated_score: percent_score(updated_mismatches_donor, total_sequence_length,
                                     recipient_has_alleles),
        updated_mismatches: record.updated_mismatches.clone(),
    }
}

/// One entry per donor for each recipient and each shown class, in donor
/// input order
pub fn make_ranking(donors: &EntityMap, recipients: &EntityMap, mismatches: &MismatchMap,
                    classes_to_show: &[MhcClass],
                    alignment_lengths: &BTreeMap<MhcClass, usize>)
    -> Ranking
{
    let empty_record = MismatchRecord::default();

    recipients.values()
        .map(|recipient| {
            let scores = classes_to_show.iter()
                .map(|class| {
                    let total_sequence_length =
                        alignment_lengths.get(class).copied().unwrap_or(0);
                    let recipient_has_alleles = !recipient.classified.get(*class).is_empty();

                    let entries = donors.keys()
                        .map(|donor_id| {
                            let record = mismatches.get(&recipient.identifier)
                                .and_then(|by_donor| by_donor.get(donor_id))
                                .and_then(|by_class| by_class.get(class))
                                .unwrap_or(&empty_record);
                            ranking_entry(donor_id, record, total_sequence_length,
                                          recipient_has_alleles)
                        })
                        .collect();

                    (*class, entries)
                })
                .collect();

            (recipient.identifier.clone(), RecipientRanking {
                recipient_id: recipient.identifier.clone(),
                scores,
            })
        })
        .collect()
}

/// Stable sort, only the order of the entries changes
pub fn sort_entries(entries: &mut [RankingEntry], sort_key: SortKey) {
    if sort_key.descending {
        entries.sort_by(|a, b| sort_key.field.value(b).cmp(&sort_key.field.value(a)));
    } else {
        entries.sort_by_key(|entry| sort_key.field.value(entry));
    }
}
