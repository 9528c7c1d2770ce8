use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Barrier, Mutex};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{TimeDelta, Utc};

use beacon_lake::error::BeaconError;
use beacon_lake::jobs::{
    Claim, FsJobStore, JobOutcome, JobRunner, JobStatus, JobStore, MemoryJobStore,
};

fn fs_store(temp: &tempfile::TempDir) -> FsJobStore {
    FsJobStore::new(Utf8PathBuf::from_path_buf(temp.path().join("jobs")).unwrap())
}

fn runs_once_then_serves_cache<J: JobStore>(runner: &JobRunner<J>) {
    let searches = AtomicUsize::new(0);
    let search = || {
        searches.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"exists":true,"count":2}"#.to_string())
    };

    let first = runner.run("query-1", search).unwrap();
    let second = runner
        .run("query-1", || {
            searches.fetch_add(1, Ordering::SeqCst);
            Ok("recomputed".to_string())
        })
        .unwrap();

    assert_eq!(searches.load(Ordering::SeqCst), 1);
    assert_matches!(&first, JobOutcome::Complete { cached: false, .. });
    let (JobOutcome::Complete { payload: a, .. }, JobOutcome::Complete { payload: b, cached }) = (first, second)
    else {
        panic!("both calls should complete");
    };
    assert!(cached);
    assert_eq!(a.as_bytes(), b.as_bytes());

    let record = runner.store().get("query-1").unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Complete);
    assert!(record.elapsed_seconds.unwrap() >= 0.0);
}

fn concurrent_claims_run_one_search<J: JobStore>(runner: &JobRunner<J>) {
    let start = Barrier::new(2);
    let searches = AtomicUsize::new(0);
    let (release, released) = mpsc::channel::<()>();
    let released = Mutex::new(released);

    let outcomes: Vec<JobOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let release = release.clone();
                let (start, searches, released) = (&start, &searches, &released);
                scope.spawn(move || {
                    start.wait();
                    let outcome = runner
                        .run("query-race", || {
                            searches.fetch_add(1, Ordering::SeqCst);
                            // Hold RUNNING until the other caller has looked.
                            let _ = released
                                .lock()
                                .unwrap()
                                .recv_timeout(Duration::from_secs(5));
                            Ok("{\"exists\":false}".to_string())
                        })
                        .unwrap();
                    if outcome == JobOutcome::StillRunning {
                        release.send(()).unwrap();
                    }
                    outcome
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(searches.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| **outcome == JobOutcome::StillRunning)
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, JobOutcome::Complete { cached: false, .. }))
            .count(),
        1
    );
}

fn failure_allows_retry<J: JobStore>(runner: &JobRunner<J>) {
    let failed = runner.run("query-2", || Err(BeaconError::VariantSearch("worker crashed".to_string())));
    assert_matches!(
        failed,
        Err(BeaconError::JobOrchestration { ref query_id, .. }) if query_id == "query-2"
    );
    let record = runner.store().get("query-2").unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.failure.unwrap().contains("worker crashed"));

    let retried = runner.run("query-2", || Ok("{\"exists\":true}".to_string())).unwrap();
    assert_matches!(retried, JobOutcome::Complete { cached: false, .. });
}

fn panicking_search_fails_the_job<J: JobStore>(runner: &JobRunner<J>) {
    let result = runner.run("query-4", || panic!("collaborator blew up"));
    assert_matches!(
        result,
        Err(BeaconError::JobOrchestration { ref reason, .. }) if reason.contains("collaborator blew up")
    );
    assert_eq!(
        runner.store().get("query-4").unwrap().unwrap().status,
        JobStatus::Failed
    );

    let retried = runner.run("query-4", || Ok("{\"exists\":false}".to_string())).unwrap();
    assert_matches!(retried, JobOutcome::Complete { cached: false, .. });
}

fn abandoned_claims_expire<J: JobStore>(store: &J) {
    let claimed_at = Utc::now() - TimeDelta::hours(3);
    assert_matches!(store.try_start("query-5", claimed_at).unwrap(), Claim::Started(_));

    let within_ttl = claimed_at + TimeDelta::minutes(30);
    assert_matches!(store.try_start("query-5", within_ttl).unwrap(), Claim::Running(_));

    let past_ttl = claimed_at + TimeDelta::hours(2);
    let Claim::Started(record) = store.try_start("query-5", past_ttl).unwrap() else {
        panic!("an abandoned claim should be claimable again");
    };
    assert_eq!(record.start_time, past_ttl);
    assert_matches!(store.try_start("query-5", past_ttl).unwrap(), Claim::Running(_));
}

#[test]
fn memory_store_runs_once_then_serves_cache() {
    runs_once_then_serves_cache(&JobRunner::new(MemoryJobStore::new()));
}

#[test]
fn memory_store_concurrent_claims_run_one_search() {
    concurrent_claims_run_one_search(&JobRunner::new(MemoryJobStore::new()));
}

#[test]
fn memory_store_failure_allows_retry() {
    failure_allows_retry(&JobRunner::new(MemoryJobStore::new()));
}

#[test]
fn fs_store_runs_once_then_serves_cache() {
    let temp = tempfile::tempdir().unwrap();
    runs_once_then_serves_cache(&JobRunner::new(fs_store(&temp)));
}

#[test]
fn fs_store_concurrent_claims_run_one_search() {
    let temp = tempfile::tempdir().unwrap();
    concurrent_claims_run_one_search(&JobRunner::new(fs_store(&temp)));
}

#[test]
fn fs_store_failure_allows_retry() {
    let temp = tempfile::tempdir().unwrap();
    failure_allows_retry(&JobRunner::new(fs_store(&temp)));
}

#[test]
fn fs_store_cache_survives_new_store_instance() {
    let temp = tempfile::tempdir().unwrap();
    let payload = r#"{"exists":true,"total":0,"results":[],"pagination":{"skip":0,"limit":10}}"#;
    JobRunner::new(fs_store(&temp))
        .run("query-3", || Ok(payload.to_string()))
        .unwrap();

    let reopened = JobRunner::new(fs_store(&temp));
    let outcome = reopened
        .run("query-3", || panic!("search must not run again"))
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Complete {
            payload: payload.to_string(),
            cached: true,
        }
    );
    assert!(!temp.path().join("jobs/query-3.running").exists());
}

#[test]
fn memory_store_panicking_search_fails_the_job() {
    panicking_search_fails_the_job(&JobRunner::new(MemoryJobStore::new()));
}

#[test]
fn fs_store_panicking_search_fails_the_job() {
    let temp = tempfile::tempdir().unwrap();
    panicking_search_fails_the_job(&JobRunner::new(fs_store(&temp)));
}

#[test]
fn memory_store_abandoned_claims_expire() {
    abandoned_claims_expire(&MemoryJobStore::new().with_claim_ttl(Duration::from_secs(3600)));
}

#[test]
fn fs_store_abandoned_claims_expire() {
    let temp = tempfile::tempdir().unwrap();
    abandoned_claims_expire(&fs_store(&temp).with_claim_ttl(Duration::from_secs(3600)));
    assert!(!temp.path().join("jobs/query-5.reclaim").exists());
}

#[test]
fn claims_without_ttl_never_expire() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(&temp);
    let claimed_at = Utc::now() - TimeDelta::days(30);
    store.try_start("query-6", claimed_at).unwrap();

    assert_matches!(store.try_start("query-6", Utc::now()).unwrap(), Claim::Running(_));
}

#[test]
fn late_finish_of_abandoned_claim_keeps_cached_result() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(&temp).with_claim_ttl(Duration::from_secs(60));
    let claimed_at = Utc::now() - TimeDelta::hours(1);
    assert_matches!(store.try_start("query-7", claimed_at).unwrap(), Claim::Started(_));
    assert_matches!(store.try_start("query-7", Utc::now()).unwrap(), Claim::Started(_));
    store.complete("query-7", 0.5, "second".to_string()).unwrap();

    assert_matches!(
        store.complete("query-7", 90.0, "first".to_string()),
        Err(BeaconError::JobStore(_))
    );
    let record = store.get("query-7").unwrap().unwrap();
    assert_eq!(record.cached_result.as_deref(), Some("second"));
}

#[test]
fn fs_store_never_runs_a_search_twice_under_contention() {
    const ROUNDS: usize = 60;
    const THREADS: usize = 8;
    const CALLS: usize = 5;

    let temp = tempfile::tempdir().unwrap();
    let runner = JobRunner::new(fs_store(&temp));
    let searches: Vec<AtomicUsize> = (0..ROUNDS).map(|_| AtomicUsize::new(0)).collect();

    for (round, counter) in searches.iter().enumerate() {
        let query_id = format!("round-{round}");
        let start = Barrier::new(THREADS);
        thread::scope(|scope| {
            for _ in 0..THREADS {
                let (runner, start, query_id) = (&runner, &start, &query_id);
                scope.spawn(move || {
                    start.wait();
                    for _ in 0..CALLS {
                        runner
                            .run(query_id, || {
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(format!("{{\"round\":{round}}}"))
                            })
                            .unwrap();
                    }
                });
            }
        });
    }

    for (round, counter) in searches.iter().enumerate() {
        assert_eq!(counter.load(Ordering::SeqCst), 1, "round {round}");
        let record = runner.store().get(&format!("round-{round}")).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.cached_result, Some(format!("{{\"round\":{round}}}")));
    }
}
