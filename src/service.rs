//! Request-level operations: compile filters, run the matching query shape for
//! the requested granularity, hydrate, and answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{Condition, FilterCompiler};
use crate::config::{ResolvedConfig, TablesConfig};
use crate::domain::{EntityQuery, EntityType, Filter, Granularity, Pagination};
use crate::engine::{FsResultStore, HttpQueryEngine, QueryEngine, QueryExecutor, ResultStore};
use crate::entities::{Analysis, Biosample, Cohort, Dataset, FilteringTerm, Individual, Run};
use crate::error::BeaconError;
use crate::hydrate::{Hydrate, RowSet, hydrate, hydrate_with_list};
use crate::jobs::{FsJobStore, JobOutcome, JobRecord, JobRunner, JobStore};
use crate::ontology::{OntologyExpander, OntologyIndex};
use crate::query::{self, EntityTable, ParentScope};
use crate::response::{BeaconResponse, FilteringTermsResponse, VariantResponse};
use crate::variants::{
    DatasetDescriptor, DatasetVariantSearch, HttpVariantSearch, SearchCriteria, VariantOrchestrator,
    aggregate,
};

/// A `g_variants` request: coordinates plus the usual entity query envelope.
/// Filters restrict the analyses whose samples are searched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantQuery {
    pub assembly_id: String,
    #[serde(flatten)]
    pub criteria: SearchCriteria,
    #[serde(flatten)]
    pub query: EntityQuery,
}

pub struct Beacon<E, R, O, V, J>
where
    E: QueryEngine,
    R: ResultStore,
    O: OntologyExpander,
    V: DatasetVariantSearch,
    J: JobStore,
{
    tables: TablesConfig,
    executor: QueryExecutor<E>,
    results: R,
    ontology: O,
    variants: VariantOrchestrator<V>,
    jobs: JobRunner<J>,
}

/// The service as deployed: HTTP engine and variant search, files for results
/// and jobs.
pub type LakeBeacon = Beacon<HttpQueryEngine, FsResultStore, OntologyIndex, HttpVariantSearch, FsJobStore>;

impl LakeBeacon {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, BeaconError> {
        let engine = HttpQueryEngine::new(&config.engine)?;
        let executor = QueryExecutor::new(
            engine,
            &config.database,
            &config.workgroup,
            config.engine.poll,
            config.engine.page_size,
        );
        let ontology = match &config.ontology_path {
            Some(path) => OntologyIndex::load(path)?,
            None => {
                tracing::warn!("no ontology configured, filter terms match only themselves");
                OntologyIndex::identity()
            }
        };
        let search = HttpVariantSearch::new(
            config.variant_search_url.as_deref(),
            config.engine.request_timeout,
        )?;
        Ok(Beacon::new(
            config.tables.clone(),
            executor,
            FsResultStore::new(config.results_root.clone()),
            ontology,
            VariantOrchestrator::new(search, config.variant_workers)?,
            JobRunner::new(FsJobStore::new(config.jobs_root.clone()).with_claim_ttl(config.job_claim_ttl)),
        ))
    }
}

impl<E, R, O, V, J> Beacon<E, R, O, V, J>
where
    E: QueryEngine,
    R: ResultStore,
    O: OntologyExpander,
    V: DatasetVariantSearch,
    J: JobStore,
{
    pub fn new(
        tables: TablesConfig,
        executor: QueryExecutor<E>,
        results: R,
        ontology: O,
        variants: VariantOrchestrator<V>,
        jobs: JobRunner<J>,
    ) -> Self {
        Self {
            tables,
            executor,
            results,
            ontology,
            variants,
            jobs,
        }
    }

    pub fn executor(&self) -> &QueryExecutor<E> {
        &self.executor
    }

    pub fn variants(&self) -> &VariantOrchestrator<V> {
        &self.variants
    }

    pub fn jobs(&self) -> &JobRunner<J> {
        &self.jobs
    }

    fn compiler(&self) -> FilterCompiler<'_> {
        FilterCompiler::new(
            &self.ontology,
            &self.tables.relations,
            &self.tables.terms_index,
        )
    }

    /// `/{entity}`: filters default to the entity's own scope.
    pub fn search_entities(&self, kind: EntityType, query: &EntityQuery) -> Result<BeaconResponse, BeaconError> {
        let condition = self.compiler().compile(&query.filters, kind, kind, "id")?;
        self.answer(kind, None, &condition, query)
    }

    /// `/{parent}/{id}/{target}`: records of `target` owned by one parent.
    /// Only filters scoped to the target apply on these routes.
    pub fn search_related(
        &self,
        parent: EntityType,
        parent_id: &str,
        target: EntityType,
        query: &EntityQuery,
    ) -> Result<BeaconResponse, BeaconError> {
        let filters: Vec<Filter> = query
            .filters
            .iter()
            .filter(|filter| filter.effective_scope(target) == target)
            .cloned()
            .collect();
        if filters.len() < query.filters.len() {
            tracing::debug!(
                dropped = query.filters.len() - filters.len(),
                %target,
                "ignoring filters outside the target scope"
            );
        }
        let condition = self.compiler().compile(&filters, target, target, "id")?;
        let scope = ParentScope {
            kind: parent,
            id: parent_id.to_string(),
        };
        self.answer(target, Some(&scope), &condition, query)
    }

    fn answer(
        &self,
        kind: EntityType,
        parent: Option<&ParentScope>,
        condition: &Condition,
        query: &EntityQuery,
    ) -> Result<BeaconResponse, BeaconError> {
        if condition.is_never() {
            tracing::info!(%kind, "filters match nothing, skipping query execution");
            return Ok(empty_response(query.granularity, query.pagination));
        }

        let table = EntityTable::new(self.executor.database(), self.tables.entity_table(kind));
        match query.granularity {
            Granularity::Boolean => {
                let rows = self.executor.rows(&table.exists(parent, condition))?;
                Ok(BeaconResponse::boolean(!rows.is_empty()))
            }
            Granularity::Count => {
                let rows = self.executor.rows(&table.count(parent, condition))?;
                Ok(BeaconResponse::count(parse_count(&rows)?))
            }
            Granularity::Record | Granularity::Aggregated => {
                let rows = self
                    .executor
                    .rows(&table.records(parent, condition, query.pagination))?;
                let results = entity_values(kind, &rows)?;
                Ok(BeaconResponse::ResultSet {
                    exists: !results.is_empty(),
                    total: results.len() as u64,
                    results,
                    pagination: query.pagination,
                })
            }
        }
    }

    /// `/{entity}/filtering_terms`.
    pub fn filtering_terms(
        &self,
        kind: EntityType,
        pagination: Pagination,
    ) -> Result<FilteringTermsResponse, BeaconError> {
        let sql = query::filtering_terms(self.executor.database(), &self.tables.terms, kind, pagination);
        let rows = self.executor.rows(&sql)?;
        Ok(FilteringTermsResponse {
            filtering_terms: hydrate::<FilteringTerm>(&rows),
            pagination,
        })
    }

    /// `/g_variants`, idempotent per query id: the first caller runs the
    /// search, concurrent callers are told it is still running, later callers
    /// get the stored payload.
    pub fn search_variants(&self, query_id: &str, request: &VariantQuery) -> Result<VariantResponse, BeaconError> {
        let outcome = self.jobs.run(query_id, || {
            let response = self.run_variant_search(query_id, request)?;
            serde_json::to_string(&response).map_err(|err| BeaconError::Serialization(err.to_string()))
        })?;
        match outcome {
            JobOutcome::Complete { payload, cached } => Ok(VariantResponse { payload, cached }),
            JobOutcome::StillRunning => Ok(VariantResponse {
                payload: serde_json::to_string(&BeaconResponse::still_running())
                    .map_err(|err| BeaconError::Serialization(err.to_string()))?,
                cached: false,
            }),
        }
    }

    pub fn job_status(&self, query_id: &str) -> Result<Option<JobRecord>, BeaconError> {
        self.jobs.store().get(query_id)
    }

    fn run_variant_search(&self, query_id: &str, request: &VariantQuery) -> Result<BeaconResponse, BeaconError> {
        let query = &request.query;
        let datasets = self.variant_datasets(request)?;
        let results = self.variants.search(
            query_id,
            &datasets,
            &request.criteria,
            query.granularity,
            query.include_resultset_responses,
        )?;
        let folded = aggregate(&results, &request.assembly_id, query.include_resultset_responses);
        tracing::info!(
            query_id,
            datasets = datasets.len(),
            exists = folded.exists,
            variants = folded.variant_count,
            "variant search aggregated"
        );

        match query.granularity {
            Granularity::Boolean => Ok(BeaconResponse::boolean(folded.exists)),
            Granularity::Count => Ok(BeaconResponse::Count {
                exists: folded.exists,
                count: folded.variant_count,
            }),
            Granularity::Record | Granularity::Aggregated => BeaconResponse::result_set(
                folded.exists,
                folded.variant_count,
                &folded.records,
                query.pagination,
            ),
        }
    }

    /// Datasets to search, each with the VCF samples of its matching analyses.
    fn variant_datasets(&self, request: &VariantQuery) -> Result<Vec<DatasetDescriptor>, BeaconError> {
        let condition = self.compiler().compile(
            &request.query.filters,
            EntityType::Analyses,
            EntityType::Analyses,
            "A.id",
        )?;
        if condition.is_never() {
            tracing::info!("analysis filters match nothing, no datasets to search");
            return Ok(Vec::new());
        }

        let database = self.executor.database();
        if condition.is_unrestricted() {
            let sql = query::assembly_datasets(database, &self.tables.datasets, &request.assembly_id);
            // Every dataset of the assembly is searched, so read the whole
            // result object rather than the first page.
            let handle = self.executor.handle(&sql)?;
            let rows = self.results.read_rows(&handle)?;
            return Ok(hydrate::<Dataset>(&rows)
                .into_iter()
                .map(|dataset| DatasetDescriptor::from_dataset(dataset, Vec::new()))
                .collect());
        }

        let sql = query::variant_datasets(
            database,
            &self.tables.analyses,
            &self.tables.datasets,
            &condition,
            &request.assembly_id,
        );
        let handle = self.executor.handle(&sql)?;
        let rows = self.results.read_rows(&handle)?;
        Ok(hydrate_with_list::<Dataset>(&rows, "samples")
            .into_iter()
            .map(|(dataset, samples)| DatasetDescriptor::from_dataset(dataset, samples))
            .collect())
    }
}

fn empty_response(granularity: Granularity, pagination: Pagination) -> BeaconResponse {
    match granularity {
        Granularity::Boolean => BeaconResponse::boolean(false),
        Granularity::Count => BeaconResponse::count(0),
        Granularity::Record | Granularity::Aggregated => BeaconResponse::ResultSet {
            exists: false,
            total: 0,
            results: Vec::new(),
            pagination,
        },
    }
}

fn parse_count(rows: &RowSet) -> Result<u64, BeaconError> {
    match rows.scalar() {
        None => Ok(0),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BeaconError::ResultRead(format!("expected a row count, got {raw:?}"))),
    }
}

fn entity_values(kind: EntityType, rows: &RowSet) -> Result<Vec<Value>, BeaconError> {
    match kind {
        EntityType::Individuals => to_values(hydrate::<Individual>(rows)),
        EntityType::Biosamples => to_values(hydrate::<Biosample>(rows)),
        EntityType::Runs => to_values(hydrate::<Run>(rows)),
        EntityType::Analyses => to_values(hydrate::<Analysis>(rows)),
        EntityType::Datasets => to_values(hydrate::<Dataset>(rows)),
        EntityType::Cohorts => to_values(hydrate::<Cohort>(rows)),
    }
}

fn to_values<T: Hydrate + Serialize>(records: Vec<T>) -> Result<Vec<Value>, BeaconError> {
    records
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .map_err(|err| BeaconError::Serialization(err.to_string()))
}
