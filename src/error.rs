use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BeaconError {
    #[error("invalid filter scope: {0}")]
    InvalidFilterScope(String),

    #[error("invalid ontology term id: {0}")]
    InvalidTermId(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("missing config file beacon-lake.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("query execution {execution_id} did not finish after {attempts} polls")]
    #[diagnostic(help("raise engine.max_poll_attempts or narrow the query"))]
    ExecutionTimeout { execution_id: String, attempts: u32 },

    #[error("query execution {execution_id} ended in state {state}: {reason}")]
    ExecutionFailed {
        execution_id: String,
        state: String,
        reason: String,
    },

    #[error("query execution {0} was cancelled by the caller")]
    ExecutionCancelled(String),

    #[error("query engine request failed: {0}")]
    EngineHttp(String),

    #[error("query engine returned status {status}: {message}")]
    EngineStatus { status: u16, message: String },

    #[error("failed to read query results: {0}")]
    ResultRead(String),

    #[error("job store error: {0}")]
    JobStore(String),

    #[error("variant search for query {query_id} failed: {reason}")]
    JobOrchestration { query_id: String, reason: String },

    #[error("variant search request failed: {0}")]
    VariantSearchHttp(String),

    #[error("variant search returned status {status}: {message}")]
    VariantSearchStatus { status: u16, message: String },

    #[error("variant search failed: {0}")]
    VariantSearch(String),

    #[error("ontology index error: {0}")]
    Ontology(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
