use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::error::BeaconError;
use crate::hydrate::RowSet;
use crate::poll::{
    CancelToken, PollOutcome, PollPolicy, Probe, RetryPolicy, poll_until, retry_with_backoff,
};
use crate::query::SqlQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionStatus {
    pub state: ExecutionState,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub query: &'a SqlQuery,
    pub database: &'a str,
    pub workgroup: &'a str,
}

/// The SQL engine behind the data lake.
pub trait QueryEngine: Send + Sync {
    fn submit(&self, request: &ExecutionRequest<'_>) -> Result<String, BeaconError>;
    fn status(&self, execution_id: &str) -> Result<ExecutionStatus, BeaconError>;
    /// First page of a finished execution, header separated from data rows.
    fn fetch_page(&self, execution_id: &str, max_rows: usize) -> Result<RowSet, BeaconError>;
}

/// Reference to the durable result object of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
}

/// Where finished executions leave their full delimited-text output.
pub trait ResultStore: Send + Sync {
    fn open(&self, handle: &ExecutionHandle) -> Result<Box<dyn Read + Send>, BeaconError>;

    fn read_rows(&self, handle: &ExecutionHandle) -> Result<RowSet, BeaconError> {
        RowSet::from_csv(self.open(handle)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    Rows,
    Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutput {
    Rows(RowSet),
    Handle(ExecutionHandle),
}

/// Submits a query once, waits for it with bounded polling, then returns
/// either the first result page or a handle to the durable output.
pub struct QueryExecutor<E: QueryEngine> {
    engine: E,
    database: String,
    workgroup: String,
    poll: PollPolicy,
    page_size: usize,
    cancel: CancelToken,
}

impl<E: QueryEngine> QueryExecutor<E> {
    pub fn new(engine: E, database: &str, workgroup: &str, poll: PollPolicy, page_size: usize) -> Self {
        Self {
            engine,
            database: database.to_string(),
            workgroup: workgroup.to_string(),
            poll,
            page_size,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn execute(&self, query: &SqlQuery, mode: ResultMode) -> Result<ExecutionOutput, BeaconError> {
        tracing::debug!(query = %query.one_line(), params = query.params.len(), "submitting query");
        let execution_id = self.engine.submit(&ExecutionRequest {
            query,
            database: &self.database,
            workgroup: &self.workgroup,
        })?;
        tracing::info!(execution_id = %execution_id, "query submitted");

        let outcome = poll_until(self.poll, &self.cancel, || {
            self.engine.status(&execution_id).map(|status| match status.state {
                ExecutionState::Queued | ExecutionState::Running => Probe::Pending,
                ExecutionState::Succeeded => Probe::Ready(()),
                ExecutionState::Failed | ExecutionState::Cancelled => Probe::Failed(status),
            })
        });

        match outcome {
            PollOutcome::Ready(()) => {}
            PollOutcome::Failed(status) => {
                tracing::warn!(execution_id = %execution_id, state = status.state.as_str(), "query execution failed");
                return Err(BeaconError::ExecutionFailed {
                    execution_id,
                    state: status.state.as_str().to_string(),
                    reason: status.reason.unwrap_or_else(|| "no reason reported".to_string()),
                });
            }
            PollOutcome::Exhausted { attempts } => {
                tracing::warn!(execution_id = %execution_id, attempts, "query execution timed out");
                return Err(BeaconError::ExecutionTimeout {
                    execution_id,
                    attempts,
                });
            }
            PollOutcome::Cancelled => return Err(BeaconError::ExecutionCancelled(execution_id)),
        }

        match mode {
            ResultMode::Handle => Ok(ExecutionOutput::Handle(ExecutionHandle { execution_id })),
            ResultMode::Rows => Ok(ExecutionOutput::Rows(
                self.engine.fetch_page(&execution_id, self.page_size)?,
            )),
        }
    }

    pub fn rows(&self, query: &SqlQuery) -> Result<RowSet, BeaconError> {
        match self.execute(query, ResultMode::Rows)? {
            ExecutionOutput::Rows(rows) => Ok(rows),
            ExecutionOutput::Handle(handle) => Err(BeaconError::ResultRead(format!(
                "expected rows, got handle {}",
                handle.execution_id
            ))),
        }
    }

    pub fn handle(&self, query: &SqlQuery) -> Result<ExecutionHandle, BeaconError> {
        match self.execute(query, ResultMode::Handle)? {
            ExecutionOutput::Handle(handle) => Ok(handle),
            ExecutionOutput::Rows(_) => Err(BeaconError::ResultRead(
                "expected handle, got rows".to_string(),
            )),
        }
    }
}

/// Renders a bound value as an engine literal. Only ever applied to values
/// sent in the parameter list, never to query text.
pub fn engine_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    query: &'a str,
    database: &'a str,
    workgroup: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    execution_parameters: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReply {
    execution_id: String,
}

#[derive(Deserialize)]
struct PageReply {
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Option<String>>>,
}

/// JSON-over-HTTP gateway in front of the SQL engine.
#[derive(Clone)]
pub struct HttpQueryEngine {
    client: Client,
    base_url: String,
}

impl HttpQueryEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, BeaconError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("beacon-lake/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BeaconError::EngineHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, BeaconError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "query engine request failed".to_string());
        Err(BeaconError::EngineStatus { status, message })
    }

    /// For idempotent reads only; submission is never retried here.
    fn send_idempotent<F>(&self, make_req: F) -> Result<reqwest::blocking::Response, BeaconError>
    where
        F: Fn() -> reqwest::blocking::RequestBuilder,
    {
        retry_with_backoff(RetryPolicy::default(), || make_req().send(), retryable_response)
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))
    }
}

impl QueryEngine for HttpQueryEngine {
    fn submit(&self, request: &ExecutionRequest<'_>) -> Result<String, BeaconError> {
        let body = SubmitBody {
            query: &request.query.text,
            database: request.database,
            workgroup: request.workgroup,
            execution_parameters: request
                .query
                .params
                .iter()
                .map(|value| engine_literal(value))
                .collect(),
        };
        let response = self
            .client
            .post(format!("{}/executions", self.base_url))
            .json(&body)
            .send()
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))?;
        let reply: SubmitReply = Self::check(response)?
            .json()
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))?;
        Ok(reply.execution_id)
    }

    fn status(&self, execution_id: &str) -> Result<ExecutionStatus, BeaconError> {
        let url = format!("{}/executions/{execution_id}", self.base_url);
        let response = self.send_idempotent(|| self.client.get(&url))?;
        Self::check(response)?
            .json()
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))
    }

    fn fetch_page(&self, execution_id: &str, max_rows: usize) -> Result<RowSet, BeaconError> {
        let url = format!("{}/executions/{execution_id}/results", self.base_url);
        let response = self.send_idempotent(|| {
            self.client
                .get(&url)
                .query(&[("maxResults", max_rows.to_string())])
        })?;
        let page: PageReply = Self::check(response)?
            .json()
            .map_err(|err| BeaconError::EngineHttp(err.to_string()))?;
        Ok(RowSet {
            header: page.header,
            rows: page
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
                .collect(),
        })
    }
}

/// Throttling, gateway errors and transport failures are worth another try.
pub(crate) fn retryable_response(
    outcome: &Result<reqwest::blocking::Response, reqwest::Error>,
) -> bool {
    match outcome {
        Ok(response) => matches!(response.status().as_u16(), 429 | 500 | 502 | 503 | 504),
        Err(err) => err.is_timeout() || err.is_connect() || err.is_request(),
    }
}

/// Result objects laid out as `<root>/query-results/<execution id>.csv`,
/// optionally gzip-compressed as `.csv.gz`.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    root: Utf8PathBuf,
}

impl FsResultStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn result_path(&self, handle: &ExecutionHandle) -> Utf8PathBuf {
        self.root
            .join("query-results")
            .join(format!("{}.csv", handle.execution_id))
    }
}

impl ResultStore for FsResultStore {
    fn open(&self, handle: &ExecutionHandle) -> Result<Box<dyn Read + Send>, BeaconError> {
        let plain = self.result_path(handle);
        if plain.as_std_path().exists() {
            let file = File::open(plain.as_std_path())
                .map_err(|err| BeaconError::ResultRead(format!("open {plain}: {err}")))?;
            return Ok(Box::new(BufReader::new(file)));
        }
        let gz = plain.with_extension("csv.gz");
        let file = File::open(gz.as_std_path())
            .map_err(|err| BeaconError::ResultRead(format!("open {gz}: {err}")))?;
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    }
}
