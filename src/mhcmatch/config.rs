use std::io::BufReader;
use std::fs::File;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::data_types::MhcClass;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address_and_port: String,
    // maximum seconds to wait for a synchronous comparison
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1:8600".to_owned()
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address_and_port: default_bind_address(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JobsConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    // queued plus processing jobs, submissions beyond this are refused
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_jobs: usize,
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: i64,
    #[serde(default = "default_max_retained_jobs")]
    pub max_retained_jobs: usize,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_worker_count() -> usize {
    1
}

fn default_max_in_flight() -> usize {
    16
}

fn default_retention_minutes() -> i64 {
    60
}

fn default_max_retained_jobs() -> usize {
    100
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            worker_count: default_worker_count(),
            max_in_flight_jobs: default_max_in_flight(),
            retention_minutes: default_retention_minutes(),
            max_retained_jobs: default_max_retained_jobs(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalysisConfig {
    #[serde(default = "default_eplet_window_buffer")]
    pub eplet_window_buffer: usize,
    // limits the donors and the recipients lists of created JSON input
    #[serde(default)]
    pub max_created_entities: Option<usize>,
}

fn default_eplet_window_buffer() -> usize {
    DEFAULT_EPLET_WINDOW_BUFFER
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            eplet_window_buffer: default_eplet_window_buffer(),
            max_created_entities: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct AlignmentConfig {
    #[serde(default = "default_match_score")]
    pub match_score: i32,
    #[serde(default = "default_mismatch_score")]
    pub mismatch_score: i32,
    #[serde(default = "default_gap_score")]
    pub gap_score: i32,
}

fn default_match_score() -> i32 {
    1
}

fn default_mismatch_score() -> i32 {
    -1
}

fn default_gap_score() -> i32 {
    -2
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            match_score: default_match_score(),
            mismatch_score: default_mismatch_score(),
            gap_score: default_gap_score(),
        }
    }
}

// used for alleles whose record doesn't say "I" or "II"
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationRule {
    pub locus_pattern: String,
    pub class: MhcClass,
}

fn default_classification_rules() -> Vec<ClassificationRule> {
    let rule = |locus_pattern: &str, class| ClassificationRule {
        locus_pattern: locus_pattern.to_owned(),
        class,
    };

    vec![
        rule("DQA", MhcClass::DQA),
        rule("DQB", MhcClass::DQB),
        rule("DRA", MhcClass::DRA),
        rule("DRB", MhcClass::DRB),
        rule(r"^(HLA-)?[ABC]$", MhcClass::ClassI),
        rule(r"^SLA-[1-3]$", MhcClass::ClassI),
        rule(r"^(Mamu|Mafa)-[ABEI]", MhcClass::ClassI),
    ]
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default = "default_classification_rules")]
    pub classification_rules: Vec<ClassificationRule>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            jobs: JobsConfig::default(),
            analysis: AnalysisConfig::default(),
            alignment: AlignmentConfig::default(),
            classification_rules: default_classification_rules(),
        }
    }
}

impl Config {
    pub fn read(config_file_name: &str) -> Result<Config> {
        let file = File::open(config_file_name)
            .with_context(|| format!("failed to read {}", config_file_name))?;
        let reader = BufReader::new(file);

        serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse {}", config_file_name))
    }
}

#[test]
fn test_config_defaults() {
    let config: Config = serde_json::from_str(r#"{"jobs": {"worker_count": 3}}"#).unwrap();

    assert_eq!(config.jobs.worker_count, 3);
    assert_eq!(config.jobs.max_in_flight_jobs, 16);
    assert_eq!(config.jobs.retention_minutes, 60);
    assert_eq!(config.analysis.eplet_window_buffer, 2);
    assert_eq!(config.alignment, AlignmentConfig::default());
    assert_eq!(config.classification_rules.len(), 7);
}
