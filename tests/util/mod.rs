use std::path::PathBuf;
use std::time::Duration;

use mhcmatch::api::jobs::{JobStore, PollResponse};
use mhcmatch::config::Config;
use mhcmatch::data_types::EntityType;
use mhcmatch::input::{RawEntity, Submission};
use mhcmatch::reference::ReferenceData;

#[allow(dead_code)]
pub const MULTIPART_BOUNDARY: &str = "mhcmatchtestboundary";

#[allow(dead_code)]
pub fn data_file_path(file_name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(file_name);
    path.to_string_lossy().into_owned()
}

#[allow(dead_code)]
pub fn get_test_config() -> Config {
    Config::read(&data_file_path("test_config.json")).expect("config")
}

#[allow(dead_code)]
pub fn get_test_reference(config: &Config) -> ReferenceData {
    ReferenceData::from_files(config,
                              &data_file_path("test_reference_alleles.json"),
                              Some(&data_file_path("test_eplets.json")),
                              Some(&data_file_path("test_structures.tsv")))
        .expect("reference data")
}

#[allow(dead_code)]
pub fn make_submission(entities: &[(&str, EntityType, &[&str])], rsa_threshold: f64)
    -> Submission
{
    Submission {
        entities: entities.iter()
            .map(|(identifier, entity_type, alleles)| RawEntity {
                identifier: identifier.to_string(),
                entity_type: *entity_type,
                alleles: alleles.iter().map(|allele| allele.to_string()).collect(),
            })
            .collect(),
        rsa_threshold,
    }
}

// pig1 has two SLA-1 alleles, mamu1 one Mamu-A1 allele
#[allow(dead_code)]
pub fn pig_and_macaque_submission() -> Submission {
    make_submission(&[("pig1", EntityType::Donor, &["SLA-1*14:05", "SLA-1*08:05"]),
                      ("mamu1", EntityType::Recipient, &["Mamu-A1*022:01:01:01"])],
                    0.25)
}

#[allow(dead_code)]
pub const PIG_AND_MACAQUE_JSON: &str = r#"{
  "donors": [{"identifier": "pig1", "type": "Donor",
              "alleles": ["SLA-1*14:05", "SLA-1*08:05"]}],
  "recipients": [{"identifier": "mamu1", "type": "Recipient",
                  "alleles": ["Mamu-A1*022:01:01:01"]}]
}"#;

#[allow(dead_code)]
pub enum FormPart<'a> {
    Text(&'a str, &'a str),
    // field name, file name, contents
    File(&'a str, &'a str, &'a str),
}

/// A multipart/form-data body using MULTIPART_BOUNDARY
#[allow(dead_code)]
pub fn multipart_body(parts: &[FormPart]) -> String {
    let mut body = String::new();

    for part in parts {
        body.push_str(&format!("--{}\r\n", MULTIPART_BOUNDARY));
        match part {
            FormPart::Text(name, value) => {
                body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                                       name));
                body.push_str(value);
            },
            FormPart::File(name, file_name, contents) => {
                body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"; \
                                        filename=\"{}\"\r\n", name, file_name));
                body.push_str("Content-Type: application/octet-stream\r\n\r\n");
                body.push_str(contents);
            },
        }
        body.push_str("\r\n");
    }

    body.push_str(&format!("--{}--\r\n", MULTIPART_BOUNDARY));
    body
}

#[allow(dead_code)]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY)
}

/// Poll until the job is completed or failed
#[allow(dead_code)]
pub async fn wait_for_job(store: &JobStore, job_id: &str) -> PollResponse {
    for _ in 0..500 {
        match store.poll(job_id).expect("known job") {
            response @ (PollResponse::Completed { .. } | PollResponse::Error { .. }) => {
                return response;
            },
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("job {} didn't finish", job_id);
}
