use std::sync::Arc;

use crate::config::Config;
use crate::input::Submission;
use crate::pipeline::run_analysis;
use crate::reference::ReferenceData;

pub mod jobs;
pub mod routes;

use jobs::{start_cleanup, start_workers, AnalysisRunner, JobStore};

pub struct AppState {
    pub reference: Arc<ReferenceData>,
    pub config: Arc<Config>,
    pub jobs: Arc<JobStore>,
    pub runner: AnalysisRunner,
}

pub fn pipeline_runner(reference: Arc<ReferenceData>, config: Arc<Config>) -> AnalysisRunner {
    Arc::new(move |submission: &Submission, job_id: &str| {
        run_analysis(&reference, &config, submission, job_id)
    })
}

impl AppState {
    /// Create the job store and start the workers and the periodic job
    /// expiry.  Needs a running tokio runtime.
    pub fn start(reference: Arc<ReferenceData>, config: Arc<Config>, runner: AnalysisRunner)
        -> Arc<AppState>
    {
        let (job_store, receiver) = JobStore::new(&config.jobs);

        start_workers(job_store.clone(), receiver, runner.clone(), config.jobs.worker_count);
        start_cleanup(job_store.clone(), config.jobs.cleanup_interval_secs);

        Arc::new(AppState {
            reference,
            config,
            jobs: job_store,
            runner,
        })
    }
}
