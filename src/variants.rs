//! Fans a variant search out over datasets and folds the per-dataset answers
//! into one de-duplicated result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::domain::{Granularity, IncludeResultsetResponses};
use crate::engine::retryable_response;
use crate::entities::{Dataset, VcfChromosomes};
use crate::error::BeaconError;
use crate::poll::{RetryPolicy, retry_with_backoff};

/// Everything the per-dataset search needs to locate a dataset's calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDescriptor {
    pub id: String,
    pub assembly_id: String,
    pub vcf_locations: BTreeSet<String>,
    pub vcf_chromosome_map: Vec<VcfChromosomes>,
    /// VCF sample columns selected by the analyses filter; empty means all.
    pub sample_ids: Vec<String>,
}

impl DatasetDescriptor {
    pub fn from_dataset(dataset: Dataset, sample_ids: Vec<String>) -> Self {
        Self {
            id: dataset.id,
            assembly_id: dataset.assembly_id,
            vcf_locations: dataset.vcf_locations.into_iter().collect(),
            vcf_chromosome_map: dataset.vcf_chromosome_map,
            sample_ids,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub reference_name: String,
    #[serde(default)]
    pub reference_bases: Option<String>,
    #[serde(default)]
    pub alternate_bases: Option<String>,
    #[serde(default)]
    pub start: Vec<u64>,
    #[serde(default)]
    pub end: Vec<u64>,
    #[serde(default)]
    pub variant_type: Option<String>,
    #[serde(default)]
    pub variant_min_length: u64,
    /// Negative means unbounded.
    #[serde(default = "unbounded")]
    pub variant_max_length: i64,
}

fn unbounded() -> i64 {
    -1
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSearchRequest<'a> {
    pub query_id: &'a str,
    pub dataset: &'a DatasetDescriptor,
    pub criteria: &'a SearchCriteria,
    pub requested_granularity: Granularity,
    pub include_resultset_responses: IncludeResultsetResponses,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSearchResult {
    pub dataset_id: String,
    pub exists: bool,
    #[serde(default)]
    pub call_count: u64,
    #[serde(default)]
    pub all_alleles_count: u64,
    /// `chrom\tpos\tref\talt\ttype` descriptors of the matching variants.
    #[serde(default)]
    pub variants: Vec<String>,
}

/// Searches one dataset's VCFs. Region and allele matching live behind this
/// seam.
pub trait DatasetVariantSearch: Send + Sync {
    fn search(&self, request: &DatasetSearchRequest<'_>) -> Result<DatasetSearchResult, BeaconError>;
}

/// Identity of a biological variant across datasets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariantKey {
    pub assembly_id: String,
    pub chromosome: String,
    pub position: u64,
    pub reference_bases: String,
    pub alternate_bases: String,
}

impl VariantKey {
    /// Stable external id: base64 of the tab-joined key.
    pub fn internal_id(&self) -> String {
        STANDARD.encode(format!(
            "{}\t{}\t{}\t{}\t{}",
            self.assembly_id,
            self.chromosome,
            self.position,
            self.reference_bases,
            self.alternate_bases
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
    pub variant_internal_id: String,
    pub assembly_id: String,
    pub reference_name: String,
    pub reference_bases: String,
    pub alternate_bases: String,
    pub start: u64,
    pub end: u64,
    pub variant_type: String,
    pub call_count: u64,
    pub all_alleles_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantAggregate {
    pub exists: bool,
    /// Distinct variant descriptors seen across datasets.
    pub variant_count: u64,
    pub records: Vec<VariantRecord>,
}

struct Accumulated {
    chromosome: String,
    variant_type: String,
    call_count: u64,
    all_alleles_count: u64,
}

/// Folds per-dataset results. Order-independent: records are keyed and
/// emitted in key order.
pub fn aggregate(
    results: &[DatasetSearchResult],
    assembly_id: &str,
    include: IncludeResultsetResponses,
) -> VariantAggregate {
    let exists = results.iter().any(|result| result.exists);
    if !include.collects_variants() {
        return VariantAggregate {
            exists,
            variant_count: 0,
            records: Vec::new(),
        };
    }

    let mut descriptors = BTreeSet::new();
    let mut counts: BTreeMap<VariantKey, Accumulated> = BTreeMap::new();
    for result in results.iter().filter(|result| result.exists) {
        for descriptor in &result.variants {
            let Some((key, variant_type)) = parse_descriptor(descriptor, assembly_id) else {
                tracing::warn!(descriptor = %descriptor, dataset = %result.dataset_id, "skipping malformed variant descriptor");
                continue;
            };
            descriptors.insert(descriptor.as_str());
            let entry = counts.entry(key).or_insert_with_key(|key| Accumulated {
                chromosome: key.chromosome.clone(),
                variant_type,
                call_count: 0,
                all_alleles_count: 0,
            });
            entry.call_count = entry.call_count.saturating_add(result.call_count);
            entry.all_alleles_count = entry.all_alleles_count.saturating_add(result.all_alleles_count);
        }
    }

    let records = counts
        .into_iter()
        .map(|(key, acc)| VariantRecord {
            variant_internal_id: key.internal_id(),
            end: key.position + key.alternate_bases.len() as u64,
            start: key.position,
            assembly_id: key.assembly_id,
            reference_name: acc.chromosome,
            reference_bases: key.reference_bases,
            alternate_bases: key.alternate_bases,
            variant_type: acc.variant_type,
            call_count: acc.call_count,
            all_alleles_count: acc.all_alleles_count,
        })
        .collect();

    VariantAggregate {
        exists,
        variant_count: descriptors.len() as u64,
        records,
    }
}

fn parse_descriptor(descriptor: &str, assembly_id: &str) -> Option<(VariantKey, String)> {
    let mut parts = descriptor.split('\t');
    let chromosome = parts.next()?;
    let position = parts.next()?.parse().ok()?;
    let reference_bases = parts.next()?;
    let alternate_bases = parts.next()?;
    let variant_type = parts.next().unwrap_or_default();
    Some((
        VariantKey {
            assembly_id: assembly_id.to_string(),
            chromosome: chromosome.to_string(),
            position,
            reference_bases: reference_bases.to_string(),
            alternate_bases: alternate_bases.to_string(),
        },
        variant_type.to_string(),
    ))
}

/// Runs dataset searches on a bounded worker pool.
pub struct VariantOrchestrator<V: DatasetVariantSearch> {
    search: V,
    pool: ThreadPool,
}

impl<V: DatasetVariantSearch> VariantOrchestrator<V> {
    pub fn new(search: V, workers: usize) -> Result<Self, BeaconError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("variant-search-{index}"))
            .build()
            .map_err(|err| BeaconError::VariantSearch(err.to_string()))?;
        Ok(Self { search, pool })
    }

    pub fn collaborator(&self) -> &V {
        &self.search
    }

    /// Boolean granularity stops dispatching new dataset searches once any
    /// dataset reports a hit; searches already in flight still finish.
    pub fn search(
        &self,
        query_id: &str,
        datasets: &[DatasetDescriptor],
        criteria: &SearchCriteria,
        granularity: Granularity,
        include: IncludeResultsetResponses,
    ) -> Result<Vec<DatasetSearchResult>, BeaconError> {
        let found = AtomicBool::new(false);
        let results = Mutex::new(Vec::with_capacity(datasets.len()));
        let short_circuit = granularity == Granularity::Boolean;

        tracing::info!(query_id, datasets = datasets.len(), %granularity, "dispatching variant search");
        self.pool.install(|| {
            datasets.par_iter().try_for_each(|dataset| {
                if short_circuit && found.load(Ordering::SeqCst) {
                    tracing::debug!(dataset = %dataset.id, "existence established, skipping dataset");
                    return Ok(());
                }
                let result = self.search.search(&DatasetSearchRequest {
                    query_id,
                    dataset,
                    criteria,
                    requested_granularity: granularity,
                    include_resultset_responses: include,
                })?;
                if result.exists {
                    found.store(true, Ordering::SeqCst);
                }
                results
                    .lock()
                    .map_err(|_| BeaconError::VariantSearch("result lock poisoned".to_string()))?
                    .push(result);
                Ok::<(), BeaconError>(())
            })
        })?;

        let mut results = results
            .into_inner()
            .map_err(|_| BeaconError::VariantSearch("result lock poisoned".to_string()))?;
        results.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        tracing::debug!(query_id, completed = results.len(), "variant search finished");
        Ok(results)
    }
}

/// Per-dataset search served by a remote worker endpoint.
#[derive(Clone)]
pub struct HttpVariantSearch {
    client: Client,
    url: Option<String>,
}

impl HttpVariantSearch {
    /// Without a url every search fails with a configuration error.
    pub fn new(url: Option<&str>, timeout: Duration) -> Result<Self, BeaconError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("beacon-lake/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BeaconError::VariantSearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| BeaconError::VariantSearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: url.map(str::to_string),
        })
    }
}

impl DatasetVariantSearch for HttpVariantSearch {
    fn search(&self, request: &DatasetSearchRequest<'_>) -> Result<DatasetSearchResult, BeaconError> {
        let url = self.url.as_deref().ok_or_else(|| {
            BeaconError::VariantSearch("variants.search_url is not configured".to_string())
        })?;
        // Dataset searches are read-only, so a retry cannot double count.
        let response = retry_with_backoff(
            RetryPolicy::default(),
            || self.client.post(url).json(request).send(),
            retryable_response,
        )
        .map_err(|err| BeaconError::VariantSearchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "variant search request failed".to_string());
            return Err(BeaconError::VariantSearchStatus { status, message });
        }
        response
            .json()
            .map_err(|err| BeaconError::VariantSearchHttp(err.to_string()))
    }
}
