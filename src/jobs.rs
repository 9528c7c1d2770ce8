//! Variant search jobs keyed by query id.
//!
//! NEW → RUNNING → COMPLETE, with FAILED as a re-claimable side exit. The only
//! contended transition is claiming a job (NEW/FAILED → RUNNING); stores must
//! make it a single atomic step so exactly one caller runs the search.

use std::any::Any;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BeaconError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    New,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub cached_result: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
}

impl JobRecord {
    pub fn complete(&self) -> bool {
        self.status == JobStatus::Complete
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Caller now owns the RUNNING job and must complete or fail it.
    Started(JobRecord),
    Running(JobRecord),
    Complete(JobRecord),
}

pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<JobRecord>, BeaconError>;
    /// Atomically moves an absent, FAILED or abandoned RUNNING job to RUNNING.
    fn try_start(&self, id: &str, now: DateTime<Utc>) -> Result<Claim, BeaconError>;
    /// RUNNING → COMPLETE; the cached payload is immutable afterwards.
    fn complete(&self, id: &str, elapsed_seconds: f64, payload: String) -> Result<JobRecord, BeaconError>;
    /// RUNNING → FAILED.
    fn fail(&self, id: &str, reason: &str) -> Result<(), BeaconError>;
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
    claim_ttl: Option<Duration>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// RUNNING jobs older than `ttl` may be claimed again.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = Some(ttl);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, JobRecord>>, BeaconError> {
        self.jobs
            .lock()
            .map_err(|_| BeaconError::JobStore("job table lock poisoned".to_string()))
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Result<Option<JobRecord>, BeaconError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn try_start(&self, id: &str, now: DateTime<Utc>) -> Result<Claim, BeaconError> {
        let mut jobs = self.lock()?;
        match jobs.get(id) {
            Some(record)
                if record.status == JobStatus::Running && !is_abandoned(record, now, self.claim_ttl) =>
            {
                Ok(Claim::Running(record.clone()))
            }
            Some(record) if record.status == JobStatus::Complete => Ok(Claim::Complete(record.clone())),
            _ => {
                let record = running_record(id, now);
                jobs.insert(id.to_string(), record.clone());
                Ok(Claim::Started(record))
            }
        }
    }

    fn complete(&self, id: &str, elapsed_seconds: f64, payload: String) -> Result<JobRecord, BeaconError> {
        let mut jobs = self.lock()?;
        let record = jobs
            .get_mut(id)
            .filter(|record| record.status == JobStatus::Running)
            .ok_or_else(|| BeaconError::JobStore(format!("job {id} is not running")))?;
        record.status = JobStatus::Complete;
        record.elapsed_seconds = Some(elapsed_seconds);
        record.cached_result = Some(payload);
        Ok(record.clone())
    }

    fn fail(&self, id: &str, reason: &str) -> Result<(), BeaconError> {
        let mut jobs = self.lock()?;
        if let Some(record) = jobs
            .get_mut(id)
            .filter(|record| record.status == JobStatus::Running)
        {
            record.status = JobStatus::Failed;
            record.failure = Some(reason.to_string());
        }
        Ok(())
    }
}

/// Job records as files under one directory, safe across processes:
///
/// - `<id>.running`: the claim, published with a no-clobber rename
/// - `<id>.json`: the completed record, published the same way and never replaced
/// - `<id>.failed`: failure marker, kept until the job is claimed again
/// - `<id>.reclaim`: held while an abandoned claim is being replaced
///
/// `.json` is always written before `.running` is removed, so a claim that
/// finds no `.json` after publishing its own `.running` is the only runner.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: Utf8PathBuf,
    claim_ttl: Option<Duration>,
}

impl FsJobStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            claim_ttl: None,
        }
    }

    /// RUNNING claims older than `ttl` are treated as left behind by a dead
    /// process and may be claimed again.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = Some(ttl);
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, id: &str, ext: &str) -> Result<Utf8PathBuf, BeaconError> {
        // Query ids become file names.
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !safe {
            return Err(BeaconError::JobStore(format!("invalid query id: {id}")));
        }
        Ok(self.root.join(format!("{id}.{ext}")))
    }

    fn ensure_root(&self) -> Result<(), BeaconError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(|err| BeaconError::Filesystem(err.to_string()))
    }

    fn read_record(path: &Utf8Path) -> Result<Option<JobRecord>, BeaconError> {
        match fs::read_to_string(path.as_std_path()) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|err| BeaconError::JobStore(format!("corrupt job record {path}: {err}"))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BeaconError::Filesystem(err.to_string())),
        }
    }

    fn staged(&self, record: &JobRecord) -> Result<tempfile::NamedTempFile, BeaconError> {
        let content =
            serde_json::to_vec_pretty(record).map_err(|err| BeaconError::Serialization(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("beacon-lake-job")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| BeaconError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| BeaconError::Filesystem(err.to_string()))?;
        Ok(temp)
    }

    /// Replaces whatever is at `path`.
    fn write_atomic(&self, path: &Utf8Path, record: &JobRecord) -> Result<(), BeaconError> {
        self.staged(record)?
            .persist(path.as_std_path())
            .map_err(|err| BeaconError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Publishes a fully written record at `path` unless something is already
    /// there. Returns `false` when another writer got there first.
    fn publish_new(&self, path: &Utf8Path, record: &JobRecord) -> Result<bool, BeaconError> {
        match self.staged(record)?.persist_noclobber(path.as_std_path()) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(BeaconError::Filesystem(err.error.to_string())),
        }
    }

    fn remove_if_present(path: &Utf8Path) -> Result<(), BeaconError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BeaconError::Filesystem(err.to_string())),
        }
    }

    /// Runs once our `.running` is published.
    fn claimed(&self, id: &str, record: JobRecord) -> Result<Claim, BeaconError> {
        if let Some(done) = Self::read_record(&self.path(id, "json")?)? {
            // Completed between our first look and the claim.
            Self::remove_if_present(&self.path(id, "running")?)?;
            return Ok(Claim::Complete(done));
        }
        Self::remove_if_present(&self.path(id, "failed")?)?;
        Ok(Claim::Started(record))
    }

    /// Someone else holds `.running`, or just released it.
    fn contended(&self, id: &str, now: DateTime<Utc>, record: JobRecord) -> Result<Claim, BeaconError> {
        match Self::read_record(&self.path(id, "running")?)? {
            Some(current) if is_abandoned(&current, now, self.claim_ttl) => self.reclaim(id, &current, record),
            Some(current) => Ok(Claim::Running(current)),
            None => match Self::read_record(&self.path(id, "json")?)? {
                Some(done) => Ok(Claim::Complete(done)),
                // Released by a failure; the next request claims it.
                None => Ok(Claim::Running(record)),
            },
        }
    }

    fn reclaim(&self, id: &str, abandoned: &JobRecord, record: JobRecord) -> Result<Claim, BeaconError> {
        let lock_path = self.path(id, "reclaim")?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path.as_std_path())
        {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(Claim::Running(abandoned.clone())),
            Err(err) => return Err(BeaconError::Filesystem(err.to_string())),
        }
        let _lock = ReclaimLock(lock_path);

        let claim_path = self.path(id, "running")?;
        match Self::read_record(&claim_path)? {
            Some(current) if current.start_time == abandoned.start_time => {
                tracing::warn!(query_id = id, started = %current.start_time, "reclaiming abandoned variant search job");
                Self::remove_if_present(&claim_path)?;
            }
            Some(current) => return Ok(Claim::Running(current)),
            None => {}
        }
        if self.publish_new(&claim_path, &record)? {
            self.claimed(id, record)
        } else {
            Ok(Claim::Running(Self::read_record(&claim_path)?.unwrap_or(record)))
        }
    }
}

/// Removes the reclaim lock file when dropped.
struct ReclaimLock(Utf8PathBuf);

impl Drop for ReclaimLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.0.as_std_path());
    }
}

impl JobStore for FsJobStore {
    fn get(&self, id: &str) -> Result<Option<JobRecord>, BeaconError> {
        for ext in ["json", "running", "failed"] {
            if let Some(record) = Self::read_record(&self.path(id, ext)?)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn try_start(&self, id: &str, now: DateTime<Utc>) -> Result<Claim, BeaconError> {
        self.ensure_root()?;
        if let Some(record) = Self::read_record(&self.path(id, "json")?)? {
            return Ok(Claim::Complete(record));
        }

        let record = running_record(id, now);
        if self.publish_new(&self.path(id, "running")?, &record)? {
            self.claimed(id, record)
        } else {
            self.contended(id, now, record)
        }
    }

    fn complete(&self, id: &str, elapsed_seconds: f64, payload: String) -> Result<JobRecord, BeaconError> {
        let claim_path = self.path(id, "running")?;
        let mut record = Self::read_record(&claim_path)?
            .ok_or_else(|| BeaconError::JobStore(format!("job {id} is not running")))?;
        record.status = JobStatus::Complete;
        record.elapsed_seconds = Some(elapsed_seconds);
        record.cached_result = Some(payload);
        if !self.publish_new(&self.path(id, "json")?, &record)? {
            return Err(BeaconError::JobStore(format!("job {id} is already complete")));
        }
        Self::remove_if_present(&claim_path)?;
        Ok(record)
    }

    fn fail(&self, id: &str, reason: &str) -> Result<(), BeaconError> {
        let claim_path = self.path(id, "running")?;
        let Some(mut record) = Self::read_record(&claim_path)? else {
            return Ok(());
        };
        record.status = JobStatus::Failed;
        record.failure = Some(reason.to_string());
        self.write_atomic(&self.path(id, "failed")?, &record)?;
        Self::remove_if_present(&claim_path)
    }
}

fn is_abandoned(record: &JobRecord, now: DateTime<Utc>, ttl: Option<Duration>) -> bool {
    ttl.is_some_and(|ttl| {
        now.signed_duration_since(record.start_time)
            .to_std()
            .is_ok_and(|age| age > ttl)
    })
}

fn running_record(id: &str, now: DateTime<Utc>) -> JobRecord {
    JobRecord {
        id: id.to_string(),
        status: JobStatus::Running,
        start_time: now,
        elapsed_seconds: None,
        cached_result: None,
        failure: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Serialized response payload, identical for the computing call and
    /// every later cache hit.
    Complete { payload: String, cached: bool },
    StillRunning,
}

pub struct JobRunner<J: JobStore> {
    store: J,
}

impl<J: JobStore> JobRunner<J> {
    pub fn new(store: J) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &J {
        &self.store
    }

    /// Runs `search` at most once per query id. Concurrent callers that lose
    /// the claim get `StillRunning`; callers after completion get the cached
    /// payload without `search` being invoked. A search that errors or panics
    /// leaves the job FAILED so a retry can claim it again.
    pub fn run<F>(&self, query_id: &str, search: F) -> Result<JobOutcome, BeaconError>
    where
        F: FnOnce() -> Result<String, BeaconError>,
    {
        let started_at = Utc::now();
        match self.store.try_start(query_id, started_at)? {
            Claim::Complete(record) => {
                tracing::info!(query_id, "serving cached variant search result");
                let payload = record.cached_result.ok_or_else(|| {
                    BeaconError::JobStore(format!("job {query_id} is complete without a payload"))
                })?;
                Ok(JobOutcome::Complete {
                    payload,
                    cached: true,
                })
            }
            Claim::Running(record) => {
                tracing::info!(query_id, started = %record.start_time, "variant search still running");
                Ok(JobOutcome::StillRunning)
            }
            Claim::Started(_) => {
                tracing::info!(query_id, "variant search job claimed");
                let clock = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(search)).unwrap_or_else(|cause| {
                    Err(BeaconError::VariantSearch(format!(
                        "search panicked: {}",
                        panic_message(&*cause)
                    )))
                });
                match outcome {
                    Ok(payload) => {
                        let elapsed = clock.elapsed().as_secs_f64();
                        if let Err(err) = self.store.complete(query_id, elapsed, payload.clone()) {
                            self.store.fail(query_id, &err.to_string())?;
                            return Err(err);
                        }
                        tracing::info!(query_id, elapsed_seconds = elapsed, "variant search job complete");
                        Ok(JobOutcome::Complete {
                            payload,
                            cached: false,
                        })
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        tracing::warn!(query_id, error = %reason, "variant search job failed");
                        self.store.fail(query_id, &reason)?;
                        Err(BeaconError::JobOrchestration {
                            query_id: query_id.to_string(),
                            reason,
                        })
                    }
                }
            }
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
