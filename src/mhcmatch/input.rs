use std::collections::HashSet;
use std::io::Cursor;

use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use regex::Regex;
use serde::Deserialize;

use crate::config::AnalysisConfig;
use crate::data_types::EntityType;
use crate::error::{MatchError, MatchResult};
use crate::types::EntityId;

const CSV_HEADER: [&str; 3] = ["identifier", "type", "haplotype"];

lazy_static! {
    static ref HAPLOTYPE_SEPARATOR_RE: Regex = Regex::new(r"[,;\s]+").unwrap();
}

/// A donor or recipient as submitted, before the alleles are resolved
#[derive(Clone, Debug, PartialEq)]
pub struct RawEntity {
    pub identifier: EntityId,
    pub entity_type: EntityType,
    pub alleles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub entities: Vec<RawEntity>,
    pub rsa_threshold: f64,
}

impl Submission {
    pub fn donors(&self) -> impl Iterator<Item = &RawEntity> {
        self.entities.iter().filter(|entity| entity.entity_type == EntityType::Donor)
    }

    pub fn recipients(&self) -> impl Iterator<Item = &RawEntity> {
        self.entities.iter().filter(|entity| entity.entity_type == EntityType::Recipient)
    }
}

/// An uploaded file, the extension of the name selects the parser
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub contents: Bytes,
}

#[derive(Deserialize, Clone, Debug)]
struct CreatedEntity {
    identifier: EntityId,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    alleles: Vec<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct CreatedData {
    #[serde(default)]
    donors: Vec<CreatedEntity>,
    #[serde(default)]
    recipients: Vec<CreatedEntity>,
}

fn invalid(message: impl Into<String>) -> MatchError {
    MatchError::validation(message)
}

/// Parse a haplotype cell, either a list literal like
/// "['A*01:01', 'A*02:01']" or a plain separated list
pub fn parse_haplotype_cell(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    let cell = cell.strip_prefix('[').unwrap_or(cell);
    let cell = cell.strip_suffix(']').unwrap_or(cell);

    HAPLOTYPE_SEPARATOR_RE.split(cell)
        .map(|part| part.trim_matches(|c| c == '\'' || c == '"'))
        .filter(|part| !part.is_empty())
        .map(|part| part.to_owned())
        .collect()
}

pub fn parse_rsa_threshold(maybe_rsa: Option<&str>) -> MatchResult<f64> {
    let rsa_str = maybe_rsa
        .map(str::trim)
        .filter(|rsa_str| !rsa_str.is_empty())
        .ok_or_else(|| invalid("An RSA threshold is required"))?;

    let rsa: f64 = rsa_str.parse()
        .map_err(|_| invalid(format!("The RSA threshold must be a number, not: {}", rsa_str)))?;

    if !rsa.is_finite() || !(0.0..=1.0).contains(&rsa) {
        return Err(invalid(format!("The RSA threshold must be between 0 and 1, not: {}", rsa)));
    }

    Ok(rsa)
}

pub fn parse_csv(contents: &[u8]) -> MatchResult<Vec<RawEntity>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let headers = csv_reader.headers()
        .map_err(|err| invalid(format!("Empty or invalid file uploaded: {}", err)))?;
    let header_names: Vec<&str> = headers.iter().map(str::trim).collect();

    if header_names.iter().all(|name| name.is_empty()) {
        return Err(invalid("Input is empty"));
    }

    if header_names != CSV_HEADER {
        return Err(invalid("Input must contain only the identifier, type and haplotype columns"));
    }

    let mut entities = vec![];

    for result in csv_reader.records() {
        let record = result
            .map_err(|err| invalid(format!("Empty or invalid file uploaded: {}", err)))?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        if record.len() != CSV_HEADER.len() {
            return Err(invalid(format!("Row {} must have exactly 3 columns",
                                       record.position().map(|pos| pos.line()).unwrap_or(0))));
        }

        let entity_type = EntityType::try_from(&record[1]).map_err(invalid)?;

        entities.push(RawEntity {
            identifier: record[0].trim().to_owned(),
            entity_type,
            alleles: parse_haplotype_cell(&record[2]),
        });
    }

    Ok(entities)
}

fn cell_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_owned(),
        other => other.to_string().trim().to_owned(),
    }
}

/// First sheet, header in the first row, then identifier, type and one
/// allele per cell
pub fn parse_spreadsheet(contents: &[u8]) -> MatchResult<Vec<RawEntity>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(contents.to_vec()))
        .map_err(|err| invalid(format!("Empty or invalid file uploaded: {}", err)))?;

    let range = workbook.worksheet_range_at(0)
        .ok_or_else(|| invalid("The spreadsheet has no sheets"))?
        .map_err(|err| invalid(format!("Empty or invalid file uploaded: {}", err)))?;

    let mut entities = vec![];

    for row in range.rows().skip(1) {
        let type_str = row.get(1).map(cell_string).unwrap_or_default();

        if type_str.is_empty() {
            continue;
        }

        let entity_type = EntityType::try_from(type_str.as_str()).map_err(invalid)?;

        entities.push(RawEntity {
            identifier: row.first().map(cell_string).unwrap_or_default(),
            entity_type,
            alleles: row.iter().skip(2)
                .map(cell_string)
                .filter(|allele| !allele.is_empty())
                .collect(),
        });
    }

    Ok(entities)
}

pub fn parse_created_data(created_json: &str, max_entities: Option<usize>)
    -> MatchResult<Vec<RawEntity>>
{
    let created: CreatedData = serde_json::from_str(created_json)
        .map_err(|err| invalid(format!("Invalid created data: {}", err)))?;

    if let Some(max) = max_entities {
        if created.donors.len() > max {
            return Err(invalid(format!("Too many donors, maximum is {}", max)));
        }
        if created.recipients.len() > max {
            return Err(invalid(format!("Too many recipients, maximum is {}", max)));
        }
    }

    let sides = [(created.donors, EntityType::Donor),
                 (created.recipients, EntityType::Recipient)];

    let mut entities = vec![];

    for (created_entities, list_type) in sides {
        for created_entity in created_entities {
            let entity_type =
                match created_entity.entity_type {
                    Some(ref type_str) => EntityType::try_from(type_str.as_str()).map_err(invalid)?,
                    None => list_type,
                };

            if entity_type != list_type {
                return Err(invalid(format!("{} is listed as a {} but has type {}",
                                           created_entity.identifier, list_type, entity_type)));
            }

            entities.push(RawEntity {
                identifier: created_entity.identifier.trim().to_owned(),
                entity_type,
                alleles: created_entity.alleles.iter()
                    .map(|allele| allele.trim().to_owned())
                    .filter(|allele| !allele.is_empty())
                    .collect(),
            });
        }
    }

    Ok(entities)
}

pub fn validate_entities(entities: &[RawEntity]) -> MatchResult<()> {
    if entities.is_empty() {
        return Err(invalid("Input is empty"));
    }

    let mut seen = HashSet::new();

    for entity in entities {
        if entity.identifier.is_empty() {
            return Err(invalid(format!("A {} has an empty identifier", entity.entity_type)));
        }
        if !seen.insert(&entity.identifier) {
            return Err(invalid(format!("The identifier {} is duplicated", entity.identifier)));
        }
    }

    if !entities.iter().any(|entity| entity.entity_type == EntityType::Donor) {
        return Err(invalid("Input must contain at least one donor"));
    }

    if !entities.iter().any(|entity| entity.entity_type == EntityType::Recipient) {
        return Err(invalid("Input must contain at least one recipient"));
    }

    if entities.iter().all(|entity| entity.alleles.is_empty()) {
        return Err(invalid("All donor and recipient haplotypes are empty"));
    }

    Ok(())
}

fn parse_file(file: &UploadedFile) -> MatchResult<Vec<RawEntity>> {
    let extension = file.file_name.rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => parse_csv(&file.contents),
        "xlsx" | "xls" => parse_spreadsheet(&file.contents),
        _ => Err(invalid(format!("Unsupported file type: {}", file.file_name))),
    }
}

/// Parse and validate a submission.  A file takes precedence over created
/// data.
pub fn parse_submission(maybe_file: Option<&UploadedFile>, maybe_created: Option<&str>,
                        maybe_rsa: Option<&str>, config: &AnalysisConfig)
    -> MatchResult<Submission>
{
    let rsa_threshold = parse_rsa_threshold(maybe_rsa)?;

    let entities =
        if let Some(file) = maybe_file {
            parse_file(file)?
        } else if let Some(created_json) = maybe_created.filter(|json| !json.trim().is_empty()) {
            parse_created_data(created_json, config.max_created_entities)?
        } else {
            return Err(invalid("No data provided"));
        };

    validate_entities(&entities)?;

    Ok(Submission {
        entities,
        rsa_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_file(contents: &str) -> UploadedFile {
        UploadedFile {
            file_name: "input.csv".to_owned(),
            contents: Bytes::from(contents.to_owned()),
        }
    }

    fn error_message(result: MatchResult<Submission>) -> String {
        match result {
            Err(MatchError::Validation(message)) => message,
            other => panic!("expected a validation error, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_haplotype_cell() {
        assert_eq!(parse_haplotype_cell("['A*01:01', 'A*02:01']"), vec!["A*01:01", "A*02:01"]);
        assert_eq!(parse_haplotype_cell("[\"A*01:01\"]"), vec!["A*01:01"]);
        assert_eq!(parse_haplotype_cell("A*01:01; B*07:02  C*01:02"),
                   vec!["A*01:01", "B*07:02", "C*01:02"]);
        assert!(parse_haplotype_cell("[]").is_empty());
        assert!(parse_haplotype_cell("").is_empty());
    }

    #[test]
    fn test_parse_rsa_threshold() {
        assert_eq!(parse_rsa_threshold(Some("0.25")).unwrap(), 0.25);
        assert_eq!(parse_rsa_threshold(Some(" 1 ")).unwrap(), 1.0);
        // there's no fallback threshold
        assert_eq!(parse_rsa_threshold(None).unwrap_err().to_string(),
                   "An RSA threshold is required");
        assert!(parse_rsa_threshold(Some("  ")).is_err());
        assert!(parse_rsa_threshold(Some("1.5")).is_err());
        assert!(parse_rsa_threshold(Some("-0.1")).is_err());
        assert!(parse_rsa_threshold(Some("NaN")).is_err());
        assert!(parse_rsa_threshold(Some("inf")).is_err());
        assert!(parse_rsa_threshold(Some("abc")).is_err());
    }

    #[test]
    fn test_parse_csv_submission() {
        let file = csv_file("identifier,type,haplotype\n\
                             pig1,Donor,\"['SLA-1*14:05', 'SLA-1*08:05']\"\n\
                             mamu1,Recipient,\"['Mamu-A1*022:01:01:01']\"\n");
        let submission =
            parse_submission(Some(&file), None, Some("0.25"), &AnalysisConfig::default()).unwrap();

        assert_eq!(submission.entities.len(), 2);
        assert_eq!(submission.rsa_threshold, 0.25);

        let donor = submission.donors().next().unwrap();
        assert_eq!(donor.identifier, "pig1");
        assert_eq!(donor.alleles, vec!["SLA-1*14:05", "SLA-1*08:05"]);
        assert_eq!(submission.recipients().count(), 1);
    }

    #[test]
    fn test_csv_validation_errors() {
        let config = AnalysisConfig::default();

        let extra_column = csv_file("identifier,type,haplotype,extra\nd1,Donor,A*01:01,x\n");
        assert!(error_message(parse_submission(Some(&extra_column), None, Some("0.5"), &config))
                .contains("only the identifier"));

        let bad_type = csv_file("identifier,type,haplotype\nd1,Donorr,A*01:01\n");
        assert!(error_message(parse_submission(Some(&bad_type), None, Some("0.5"), &config))
                .contains("Donor or Recipient"));

        let duplicated = csv_file("identifier,type,haplotype\nd1,Donor,A*01:01\n\
                                   d1,Recipient,A*02:01\n");
        assert!(error_message(parse_submission(Some(&duplicated), None, Some("0.5"), &config))
                .contains("duplicated"));

        let no_recipient = csv_file("identifier,type,haplotype\nd1,Donor,A*01:01\n");
        assert!(error_message(parse_submission(Some(&no_recipient), None, Some("0.5"), &config))
                .contains("recipient"));

        let all_empty = csv_file("identifier,type,haplotype\nd1,Donor,[]\nr1,Recipient,[]\n");
        assert!(error_message(parse_submission(Some(&all_empty), None, Some("0.5"), &config))
                .contains("empty"));

        let header_only = csv_file("identifier,type,haplotype\n");
        assert_eq!(error_message(parse_submission(Some(&header_only), None, Some("0.5"), &config)),
                   "Input is empty");

        let wrong_extension = UploadedFile {
            file_name: "input.txt".to_owned(),
            contents: Bytes::from_static(b"identifier,type,haplotype\n"),
        };
        assert!(error_message(parse_submission(Some(&wrong_extension), None, Some("0.5"), &config))
                .contains("Unsupported"));

        assert_eq!(error_message(parse_submission(None, None, Some("0.5"), &config)),
                   "No data provided");
    }

    #[test]
    fn test_parse_created_data() {
        let json = r#"{"donors": [{"identifier": "d1", "type": "Donor", "alleles": ["A*01:01", " "]}],
                       "recipients": [{"identifier": "r1", "alleles": ["A*02:01"]}]}"#;
        let submission =
            parse_submission(None, Some(json), Some("0"), &AnalysisConfig::default()).unwrap();

        assert_eq!(submission.entities, vec![
            RawEntity {
                identifier: "d1".to_owned(),
                entity_type: EntityType::Donor,
                alleles: vec!["A*01:01".to_owned()],
            },
            RawEntity {
                identifier: "r1".to_owned(),
                entity_type: EntityType::Recipient,
                alleles: vec!["A*02:01".to_owned()],
            },
        ]);

        let limited = AnalysisConfig {
            max_created_entities: Some(0),
            ..AnalysisConfig::default()
        };
        assert!(error_message(parse_submission(None, Some(json), Some("0"), &limited))
                .contains("Too many donors"));

        let mislabelled = r#"{"donors": [{"identifier": "d1", "type": "Recipient", "alleles": []}]}"#;
        assert!(parse_submission(None, Some(mislabelled), Some("0"), &AnalysisConfig::default())
                .is_err());
    }
}
