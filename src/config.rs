use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::EntityType;
use crate::error::BeaconError;
use crate::poll::PollPolicy;
use crate::query::validate_name;

pub const ENGINE_URL_ENV: &str = "BEACON_ENGINE_URL";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub database: String,
    #[serde(default = "default_workgroup")]
    pub workgroup: String,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub results: Option<ResultsConfig>,
    #[serde(default)]
    pub ontology: Option<OntologyConfig>,
    #[serde(default)]
    pub variants: VariantsConfig,
    #[serde(default)]
    pub jobs: Option<JobsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TablesConfig {
    #[serde(default = "default_individuals")]
    pub individuals: String,
    #[serde(default = "default_biosamples")]
    pub biosamples: String,
    #[serde(default = "default_runs")]
    pub runs: String,
    #[serde(default = "default_analyses")]
    pub analyses: String,
    #[serde(default = "default_datasets")]
    pub datasets: String,
    #[serde(default = "default_cohorts")]
    pub cohorts: String,
    #[serde(default = "default_relations")]
    pub relations: String,
    #[serde(default = "default_terms_index")]
    pub terms_index: String,
    #[serde(default = "default_terms")]
    pub terms: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            individuals: default_individuals(),
            biosamples: default_biosamples(),
            runs: default_runs(),
            analyses: default_analyses(),
            datasets: default_datasets(),
            cohorts: default_cohorts(),
            relations: default_relations(),
            terms_index: default_terms_index(),
            terms: default_terms(),
        }
    }
}

impl TablesConfig {
    pub fn entity_table(&self, entity: EntityType) -> &str {
        match entity {
            EntityType::Individuals => &self.individuals,
            EntityType::Biosamples => &self.biosamples,
            EntityType::Runs => &self.runs,
            EntityType::Analyses => &self.analyses,
            EntityType::Datasets => &self.datasets,
            EntityType::Cohorts => &self.cohorts,
        }
    }

    fn validate(&self) -> Result<(), BeaconError> {
        for name in [
            &self.individuals,
            &self.biosamples,
            &self.runs,
            &self.analyses,
            &self.datasets,
            &self.cohorts,
            &self.relations,
            &self.terms_index,
            &self.terms,
        ] {
            validate_name(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResultsConfig {
    pub root: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OntologyConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VariantsConfig {
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for VariantsConfig {
    fn default() -> Self {
        Self {
            search_url: None,
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobsConfig {
    pub root: String,
    /// A RUNNING claim older than this is treated as abandoned.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_url: String,
    pub poll: PollPolicy,
    pub page_size: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: String,
    pub workgroup: String,
    pub tables: TablesConfig,
    pub engine: EngineSettings,
    pub results_root: Utf8PathBuf,
    pub ontology_path: Option<Utf8PathBuf>,
    pub variant_search_url: Option<String>,
    pub variant_workers: usize,
    pub jobs_root: Utf8PathBuf,
    pub job_claim_ttl: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BeaconError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("beacon-lake.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(BeaconError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BeaconError::ConfigRead(config_path.clone()))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|err| BeaconError::ConfigParse(err.to_string()))?;

        if let Ok(url) = std::env::var(ENGINE_URL_ENV) {
            if !url.trim().is_empty() {
                config.engine.base_url = url.trim().to_string();
            }
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BeaconError> {
        validate_name(&config.database)?;
        config.tables.validate()?;

        if config.engine.max_poll_attempts == 0 {
            return Err(BeaconError::ConfigParse(
                "engine.max_poll_attempts must be at least 1".to_string(),
            ));
        }
        if config.variants.workers == 0 {
            return Err(BeaconError::ConfigParse(
                "variants.workers must be at least 1".to_string(),
            ));
        }

        let cache_root = match (&config.results, &config.jobs) {
            (Some(_), Some(_)) => None,
            _ => Some(default_cache_root()?),
        };
        let results_root = match config.results {
            Some(results) => Utf8PathBuf::from(results.root),
            None => cache_root
                .as_ref()
                .map(|root| root.join("results"))
                .unwrap_or_default(),
        };
        let job_claim_ttl = Duration::from_secs(
            config
                .jobs
                .as_ref()
                .map_or_else(default_claim_ttl_secs, |jobs| jobs.claim_ttl_secs),
        );
        if job_claim_ttl.is_zero() {
            return Err(BeaconError::ConfigParse(
                "jobs.claim_ttl_secs must be at least 1".to_string(),
            ));
        }
        let jobs_root = match config.jobs {
            Some(jobs) => Utf8PathBuf::from(jobs.root),
            None => cache_root
                .as_ref()
                .map(|root| root.join("jobs"))
                .unwrap_or_default(),
        };

        Ok(ResolvedConfig {
            database: config.database,
            workgroup: config.workgroup,
            tables: config.tables,
            engine: EngineSettings {
                base_url: config.engine.base_url.trim_end_matches('/').to_string(),
                poll: PollPolicy {
                    interval: Duration::from_millis(config.engine.poll_interval_ms),
                    max_attempts: config.engine.max_poll_attempts,
                },
                page_size: config.engine.page_size,
                request_timeout: Duration::from_secs(config.engine.request_timeout_secs),
            },
            results_root,
            ontology_path: config.ontology.map(|ontology| Utf8PathBuf::from(ontology.path)),
            variant_search_url: config.variants.search_url,
            variant_workers: config.variants.workers,
            jobs_root,
            job_claim_ttl,
        })
    }
}

fn default_cache_root() -> Result<Utf8PathBuf, BeaconError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("beacon-lake")).ok()
        })
        .ok_or_else(|| BeaconError::Filesystem("unable to resolve cache directory".to_string()))
}

fn default_workgroup() -> String {
    "primary".to_string()
}

fn default_individuals() -> String {
    "individuals".to_string()
}

fn default_biosamples() -> String {
    "biosamples".to_string()
}

fn default_runs() -> String {
    "runs".to_string()
}

fn default_analyses() -> String {
    "analyses".to_string()
}

fn default_datasets() -> String {
    "datasets".to_string()
}

fn default_cohorts() -> String {
    "cohorts".to_string()
}

fn default_relations() -> String {
    "relations".to_string()
}

fn default_terms_index() -> String {
    "terms_index".to_string()
}

fn default_terms() -> String {
    "terms".to_string()
}

fn default_engine_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_poll_attempts() -> u32 {
    300
}

fn default_page_size() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_claim_ttl_secs() -> u64 {
    6 * 60 * 60
}
