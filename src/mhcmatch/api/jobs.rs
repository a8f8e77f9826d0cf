use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::data_types::AnalysisResult;
use crate::error::{MatchError, MatchResult};
use crate::input::Submission;
use crate::types::JobId;

/// Runs the analysis of one job, called from a blocking thread
pub type AnalysisRunner =
    Arc<dyn Fn(&Submission, &str) -> anyhow::Result<AnalysisResult> + Send + Sync>;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    // FIFO order of submission
    seq: u64,
    // taken by the worker when processing starts
    submission: Option<Submission>,
    pub result: Option<Arc<AnalysisResult>>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PollResponse {
    Queued { queue_position: usize },
    Processing,
    Completed { result: Arc<AnalysisResult> },
    Error { error: String },
}

/// A slot for an analysis that runs outside the queue.  Counts as an
/// in-flight job until dropped.
#[derive(Debug)]
pub struct AnalysisSlot {
    reserved: Arc<AtomicUsize>,
}

impl Drop for AnalysisSlot {
    fn drop(&mut self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    // slots held by analyses that aren't in the job map
    reserved: Arc<AtomicUsize>,
    next_seq: AtomicU64,
    sender: mpsc::Sender<JobId>,
    config: JobsConfig,
}

impl JobStore {
    /// Returns the store and the receiving end of the job queue for the
    /// workers
    pub fn new(config: &JobsConfig) -> (Arc<JobStore>, mpsc::Receiver<JobId>) {
        let (sender, receiver) = mpsc::channel(config.max_in_flight_jobs.max(1));

        let store = JobStore {
            jobs: RwLock::new(HashMap::new()),
            reserved: Arc::new(AtomicUsize::new(0)),
            next_seq: AtomicU64::new(0),
            sender,
            config: config.clone(),
        };

        (Arc::new(store), receiver)
    }

    // a panic while holding the lock can't leave a job half written so a
    // poisoned lock is still usable
    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    // callers hold the jobs lock so that checking and taking a slot can't
    // interleave
    fn count_in_flight(&self, jobs: &HashMap<JobId, Job>) -> usize {
        let queued_or_running = jobs.values()
            .filter(|job| !job.status.is_terminal())
            .count();
        queued_or_running + self.reserved.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.count_in_flight(&self.read_jobs())
    }

    /// Take a slot for an analysis run outside the queue, or refuse it when
    /// the in-flight limit is reached
    pub fn try_reserve(&self) -> MatchResult<AnalysisSlot> {
        let jobs = self.write_jobs();

        let in_flight = self.count_in_flight(&jobs);
        if in_flight >= self.config.max_in_flight_jobs {
            warn!("refusing analysis, {} jobs in flight", in_flight);
            return Err(MatchError::Capacity(in_flight));
        }

        self.reserved.fetch_add(1, Ordering::SeqCst);

        Ok(AnalysisSlot {
            reserved: self.reserved.clone(),
        })
    }

    pub fn job_count(&self) -> usize {
        self.read_jobs().len()
    }

    /// Queue a job, or refuse it when the in-flight limit is reached
    pub fn submit(&self, submission: Submission) -> MatchResult<JobId> {
        let mut jobs = self.write_jobs();

        let in_flight = self.count_in_flight(&jobs);
        if in_flight >= self.config.max_in_flight_jobs {
            warn!("refusing job, {} jobs in flight", in_flight);
            return Err(MatchError::Capacity(in_flight));
        }

        let job_id = Uuid::new_v4().to_string();
        let donor_count = submission.donors().count();
        let recipient_count = submission.recipients().count();

        let job = Job {
            id: job_id.clone(),
            status: JobStatus::Queued,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            submission: Some(submission),
            result: None,
            error: None,
            submitted_at: Utc::now(),
            completed_at: None,
        };

        jobs.insert(job_id.clone(), job);

        if let Err(err) = self.sender.try_send(job_id.clone()) {
            jobs.remove(&job_id);
            warn!("failed to queue job {}: {}", job_id, err);
            return Err(MatchError::Capacity(in_flight));
        }

        info!("queued job {} with {} donors and {} recipients", job_id, donor_count,
              recipient_count);

        Ok(job_id)
    }

    // mark the job as processing and hand over its submission
    fn start_job(&self, job_id: &str) -> Option<Submission> {
        let mut jobs = self.write_jobs();
        let job = jobs.get_mut(job_id)?;

        if job.status != JobStatus::Queued {
            return None;
        }

        job.status = JobStatus::Processing;
        job.submission.take()
    }

    fn finish_job(&self, job_id: &str, outcome: Result<AnalysisResult, String>) {
        let mut jobs = self.write_jobs();
        let Some(job) = jobs.get_mut(job_id) else {
            warn!("job {} disappeared while processing", job_id);
            return;
        };

        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.result = Some(Arc::new(result));
                info!("job {} completed", job_id);
            },
            Err(message) => {
                job.status = JobStatus::Error;
                error!("job {} failed: {}", job_id, message);
                job.error = Some(message);
            },
        }

        job.completed_at = Some(Utc::now());
    }

    // queued jobs submitted before this one
    fn queue_position(jobs: &HashMap<JobId, Job>, job: &Job) -> usize {
        jobs.values()
            .filter(|other| other.status == JobStatus::Queued && other.seq < job.seq)
            .count()
    }

    pub fn poll(&self, job_id: &str) -> MatchResult<PollResponse> {
        let jobs = self.read_jobs();
        let job = jobs.get(job_id)
            .ok_or_else(|| MatchError::not_found(format!("Job not found: {}", job_id)))?;

        let response =
            match job.status {
                JobStatus::Queued => PollResponse::Queued {
                    queue_position: JobStore::queue_position(&jobs, job),
                },
                JobStatus::Processing => PollResponse::Processing,
                JobStatus::Completed => {
                    match job.result {
                        Some(ref result) => PollResponse::Completed { result: result.clone() },
                        None => PollResponse::Error {
                            error: "Job completed without a result".to_owned(),
                        },
                    }
                },
                JobStatus::Error => PollResponse::Error {
                    error: job.error.clone().unwrap_or_else(|| "Job failed".to_owned()),
                },
            };

        Ok(response)
    }

    /// The result of a completed job
    pub fn result(&self, job_id: &str) -> MatchResult<Arc<AnalysisResult>> {
        let jobs = self.read_jobs();
        let job = jobs.get(job_id)
            .ok_or_else(|| MatchError::not_found(format!("Job not found: {}", job_id)))?;

        job.result.clone()
            .ok_or_else(|| MatchError::validation(format!("Job {} has no result", job_id)))
    }

    /// Remove terminal jobs older than the retention period, then the
    /// oldest terminal jobs beyond the retained job limit
    pub fn expire_jobs(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::minutes(self.config.retention_minutes);
        let mut jobs = self.write_jobs();
        let before_count = jobs.len();

        jobs.retain(|_, job| {
            match job.completed_at {
                Some(completed_at) if job.status.is_terminal() => completed_at + retention > now,
                _ => true,
            }
        });

        let mut terminal: Vec<(DateTime<Utc>, u64, JobId)> = jobs.values()
            .filter_map(|job| {
                let completed_at = job.completed_at.filter(|_| job.status.is_terminal())?;
                Some((completed_at, job.seq, job.id.clone()))
            })
            .collect();

        if terminal.len() > self.config.max_retained_jobs {
            terminal.sort();
            let excess = terminal.len() - self.config.max_retained_jobs;
            for (_, _, job_id) in terminal.into_iter().take(excess) {
                jobs.remove(&job_id);
            }
        }

        let removed = before_count - jobs.len();
        if removed > 0 {
            info!("expired {} jobs", removed);
        }

        removed
    }

    #[cfg(test)]
    fn set_completed_at(&self, job_id: &str, completed_at: DateTime<Utc>) {
        if let Some(job) = self.write_jobs().get_mut(job_id) {
            job.completed_at = Some(completed_at);
        }
    }
}

async fn process_job(store: &Arc<JobStore>, runner: &AnalysisRunner, job_id: JobId) {
    let Some(submission) = store.start_job(&job_id) else {
        warn!("job {} is not waiting to be processed", job_id);
        return;
    };

    info!("processing job {}", job_id);

    let blocking_runner = runner.clone();
    let blocking_job_id = job_id.clone();
    let join_result = tokio::task::spawn_blocking(move || {
        blocking_runner(&submission, &blocking_job_id)
    }).await;

    let outcome =
        match join_result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(MatchError::from(err).to_string()),
            Err(join_error) => {
                if join_error.is_panic() {
                    Err("The analysis failed unexpectedly".to_owned())
                } else {
                    Err("The analysis was cancelled".to_owned())
                }
            },
        };

    store.finish_job(&job_id, outcome);
    store.expire_jobs(Utc::now());
}

/// Start the workers that take jobs from the queue, each runs one job at
/// a time
pub fn start_workers(store: Arc<JobStore>, receiver: mpsc::Receiver<JobId>,
                     runner: AnalysisRunner, worker_count: usize)
    -> Vec<JoinHandle<()>>
{
    let receiver = Arc::new(Mutex::new(receiver));

    (0..worker_count.max(1))
        .map(|worker_idx| {
            let store = store.clone();
            let receiver = receiver.clone();
            let runner = runner.clone();

            tokio::spawn(async move {
                loop {
                    let maybe_job_id = receiver.lock().await.recv().await;
                    let Some(job_id) = maybe_job_id else {
                        info!("worker {} stopping", worker_idx);
                        break;
                    };
                    process_job(&store, &runner, job_id).await;
                }
            })
        })
        .collect()
}

pub fn start_cleanup(store: Arc<JobStore>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            store.expire_jobs(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::data_types::EntityType;
    use crate::input::RawEntity;

    fn make_submission() -> Submission {
        Submission {
            entities: vec![RawEntity {
                identifier: "d1".to_owned(),
                entity_type: EntityType::Donor,
                alleles: vec!["A*01:01".to_owned()],
            }],
            rsa_threshold: 0.25,
        }
    }

    fn test_config(max_in_flight_jobs: usize) -> JobsConfig {
        JobsConfig {
            max_in_flight_jobs,
            ..Default::default()
        }
    }

    #[test]
    fn test_capacity() {
        let (store, _receiver) = JobStore::new(&test_config(2));

        store.submit(make_submission()).unwrap();
        store.submit(make_submission()).unwrap();

        assert_eq!(store.submit(make_submission()), Err(MatchError::Capacity(2)));
        assert_eq!(store.job_count(), 2);
        assert_eq!(store.in_flight_count(), 2);
    }

    #[test]
    fn test_reserved_slots_count_as_in_flight() {
        let (store, _receiver) = JobStore::new(&test_config(2));

        let slot = store.try_reserve().unwrap();
        store.submit(make_submission()).unwrap();
        assert_eq!(store.in_flight_count(), 2);

        assert_eq!(store.submit(make_submission()), Err(MatchError::Capacity(2)));
        assert_eq!(store.try_reserve().unwrap_err(), MatchError::Capacity(2));

        drop(slot);
        assert_eq!(store.in_flight_count(), 1);
        let _slot = store.try_reserve().unwrap();
        assert!(store.submit(make_submission()).is_err());
    }

    #[test]
    fn test_queue_position() {
        let (store, _receiver) = JobStore::new(&test_config(5));

        let first = store.submit(make_submission()).unwrap();
        let second = store.submit(make_submission()).unwrap();
        let third = store.submit(make_submission()).unwrap();

        let position = |job_id: &str| match store.poll(job_id).unwrap() {
            PollResponse::Queued { queue_position } => queue_position,
            other => panic!("unexpected: {:?}", other),
        };

        assert_eq!(position(&first), 0);
        assert_eq!(position(&third), 2);

        assert!(store.start_job(&first).is_some());
        assert!(matches!(store.poll(&first).unwrap(), PollResponse::Processing));
        assert_eq!(position(&second), 0);
        assert_eq!(position(&third), 1);

        // a job is only started once
        assert!(store.start_job(&first).is_none());
    }

    #[test]
    fn test_unknown_job() {
        let (store, _receiver) = JobStore::new(&test_config(5));
        assert!(matches!(store.poll("no-such-job"), Err(MatchError::NotFound(_))));
        assert!(matches!(store.result("no-such-job"), Err(MatchError::NotFound(_))));
    }

    #[test]
    fn test_error_job() {
        let (store, _receiver) = JobStore::new(&test_config(5));
        let job_id = store.submit(make_submission()).unwrap();
        store.start_job(&job_id);
        store.finish_job(&job_id, Err("failed to align".to_owned()));

        match store.poll(&job_id).unwrap() {
            PollResponse::Error { error } => assert_eq!(error, "failed to align"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(store.result(&job_id), Err(MatchError::Validation(_))));
        assert_eq!(store.in_flight_count(), 0);
    }

    #[test]
    fn test_expire_jobs() {
        let config = JobsConfig {
            max_in_flight_jobs: 10,
            retention_minutes: 60,
            max_retained_jobs: 2,
            ..Default::default()
        };
        let (store, _receiver) = JobStore::new(&config);
        let now = Utc::now();

        let job_ids: Vec<JobId> = (0..4)
            .map(|_| store.submit(make_submission()).unwrap())
            .collect();

        for (idx, job_id) in job_ids.iter().take(3).enumerate() {
            store.start_job(job_id);
            store.finish_job(job_id, Err("failed".to_owned()));
            store.set_completed_at(job_id, now - chrono::Duration::minutes(30 - idx as i64));
        }

        // the oldest terminal job goes to keep two, the queued job stays
        assert_eq!(store.expire_jobs(now), 1);
        assert!(store.poll(&job_ids[0]).is_err());
        assert!(store.poll(&job_ids[1]).is_ok());
        assert!(store.poll(&job_ids[3]).is_ok());

        // everything terminal is past the retention period an hour later
        assert_eq!(store.expire_jobs(now + chrono::Duration::minutes(61)), 2);
        assert_eq!(store.job_count(), 1);
    }
}
