use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use beacon_lake::engine::{
    ExecutionHandle, ExecutionRequest, ExecutionState, ExecutionStatus, FsResultStore,
    QueryEngine, QueryExecutor, ResultStore,
};
use beacon_lake::error::BeaconError;
use beacon_lake::hydrate::RowSet;
use beacon_lake::poll::{CancelToken, PollPolicy};
use beacon_lake::query::SqlQuery;

/// Plays back a fixed sequence of status replies; the last one repeats.
struct ScriptedEngine {
    statuses: Mutex<VecDeque<Result<ExecutionState, String>>>,
    submitted: Mutex<Vec<SqlQuery>>,
    status_calls: Mutex<usize>,
    page: RowSet,
}

impl ScriptedEngine {
    fn new(statuses: Vec<Result<ExecutionState, String>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            submitted: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
            page: RowSet {
                header: vec!["id".to_string()],
                rows: vec![vec!["r1".to_string()]],
            },
        }
    }
}

impl QueryEngine for ScriptedEngine {
    fn submit(&self, request: &ExecutionRequest<'_>) -> Result<String, BeaconError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.query.clone());
        Ok(format!("exec-{}", submitted.len()))
    }

    fn status(&self, _execution_id: &str) -> Result<ExecutionStatus, BeaconError> {
        *self.status_calls.lock().unwrap() += 1;
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().cloned().unwrap()
        };
        match next {
            Ok(ExecutionState::Failed) => Ok(ExecutionStatus {
                state: ExecutionState::Failed,
                reason: Some("SYNTAX_ERROR".to_string()),
            }),
            Ok(state) => Ok(ExecutionStatus { state, reason: None }),
            Err(message) => Err(BeaconError::EngineHttp(message)),
        }
    }

    fn fetch_page(&self, _execution_id: &str, max_rows: usize) -> Result<RowSet, BeaconError> {
        assert_eq!(max_rows, 50);
        Ok(self.page.clone())
    }
}

fn executor(engine: ScriptedEngine, max_attempts: u32) -> QueryExecutor<ScriptedEngine> {
    let policy = PollPolicy {
        interval: Duration::from_millis(1),
        max_attempts,
    };
    QueryExecutor::new(engine, "lake", "primary", policy, 50)
}

fn query() -> SqlQuery {
    SqlQuery {
        text: "SELECT * FROM \"lake\".\"runs\" WHERE \"biosampleid\" = ?".to_string(),
        params: vec!["b'1".to_string()],
    }
}

#[test]
fn rows_after_pending_polls() {
    let executor = executor(
        ScriptedEngine::new(vec![
            Ok(ExecutionState::Queued),
            Ok(ExecutionState::Running),
            Ok(ExecutionState::Succeeded),
        ]),
        10,
    );

    let rows = executor.rows(&query()).unwrap();

    assert_eq!(rows.rows, vec![vec!["r1".to_string()]]);
    let submitted = executor.engine().submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].params, vec!["b'1".to_string()]);
    assert!(!submitted[0].text.contains("b'1"));
}

#[test]
fn poll_errors_never_resubmit() {
    let executor = executor(
        ScriptedEngine::new(vec![
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Ok(ExecutionState::Succeeded),
        ]),
        10,
    );

    let handle = executor.handle(&query()).unwrap();

    assert_eq!(handle.execution_id, "exec-1");
    assert_eq!(executor.engine().submitted.lock().unwrap().len(), 1);
    assert_eq!(*executor.engine().status_calls.lock().unwrap(), 3);
}

#[test]
fn bounded_polling_times_out() {
    let executor = executor(ScriptedEngine::new(vec![Ok(ExecutionState::Running)]), 3);

    let result = executor.rows(&query());

    assert_matches!(
        result,
        Err(BeaconError::ExecutionTimeout { attempts: 3, .. })
    );
    assert_eq!(*executor.engine().status_calls.lock().unwrap(), 3);
}

#[test]
fn engine_failure_is_not_an_empty_result() {
    let executor = executor(
        ScriptedEngine::new(vec![Ok(ExecutionState::Running), Ok(ExecutionState::Failed)]),
        10,
    );

    let result = executor.rows(&query());

    assert_matches!(
        result,
        Err(BeaconError::ExecutionFailed { ref state, ref reason, .. })
            if state == "FAILED" && reason == "SYNTAX_ERROR"
    );
}

#[test]
fn cancelled_wait_stops_polling() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let executor = executor(ScriptedEngine::new(vec![Ok(ExecutionState::Running)]), 10)
        .with_cancel(cancel);

    assert_matches!(
        executor.rows(&query()),
        Err(BeaconError::ExecutionCancelled(id)) if id == "exec-1"
    );
    assert_eq!(*executor.engine().status_calls.lock().unwrap(), 0);
}

#[test]
fn result_store_reads_plain_and_gzip_objects() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    std::fs::create_dir_all(root.join("query-results")).unwrap();
    std::fs::write(root.join("query-results/plain.csv"), "id,name\nd1,first\n").unwrap();
    let mut encoder = GzEncoder::new(
        std::fs::File::create(root.join("query-results/packed.csv.gz")).unwrap(),
        Compression::default(),
    );
    encoder.write_all(b"id,name\nd2,second\n").unwrap();
    encoder.finish().unwrap();

    let store = FsResultStore::new(root);
    let plain = store
        .read_rows(&ExecutionHandle {
            execution_id: "plain".to_string(),
        })
        .unwrap();
    let packed = store
        .read_rows(&ExecutionHandle {
            execution_id: "packed".to_string(),
        })
        .unwrap();

    assert_eq!(plain.rows[0], vec!["d1", "first"]);
    assert_eq!(packed.rows[0], vec!["d2", "second"]);
    assert_matches!(
        store.read_rows(&ExecutionHandle {
            execution_id: "missing".to_string(),
        }),
        Err(BeaconError::ResultRead(_))
    );
}
