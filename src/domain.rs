use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BeaconError;

static TERM_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[^:]+:.+$").expect("term id pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Individuals,
    Biosamples,
    Runs,
    Analyses,
    Datasets,
    Cohorts,
}

impl EntityType {
    /// Canonical order used whenever generated text must be stable.
    pub const ALL: [EntityType; 6] = [
        EntityType::Individuals,
        EntityType::Biosamples,
        EntityType::Runs,
        EntityType::Analyses,
        EntityType::Datasets,
        EntityType::Cohorts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Individuals => "individuals",
            EntityType::Biosamples => "biosamples",
            EntityType::Runs => "runs",
            EntityType::Analyses => "analyses",
            EntityType::Datasets => "datasets",
            EntityType::Cohorts => "cohorts",
        }
    }

    /// Column holding this entity's id in the relations table and in child
    /// entity tables.
    pub fn relation_column(&self) -> &'static str {
        match self {
            EntityType::Individuals => "individualid",
            EntityType::Biosamples => "biosampleid",
            EntityType::Runs => "runid",
            EntityType::Analyses => "analysisid",
            EntityType::Datasets => "datasetid",
            EntityType::Cohorts => "cohortid",
        }
    }

    /// Lenient scope resolution: absent or unrecognized scopes fall back to
    /// the endpoint default.
    pub fn from_scope_or(scope: Option<&str>, default: EntityType) -> EntityType {
        match scope {
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::debug!(scope = value, default = %default, "unrecognized filter scope");
                default
            }),
            None => default,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = BeaconError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "individuals" => Ok(EntityType::Individuals),
            "biosamples" => Ok(EntityType::Biosamples),
            "runs" => Ok(EntityType::Runs),
            "analyses" => Ok(EntityType::Analyses),
            "datasets" => Ok(EntityType::Datasets),
            "cohorts" => Ok(EntityType::Cohorts),
            _ => Err(BeaconError::InvalidFilterScope(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TermId(String);

impl TermId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TermId {
    type Err = BeaconError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !TERM_ID_PATTERN.is_match(trimmed) {
            return Err(BeaconError::InvalidTermId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for TermId {
    type Error = BeaconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TermId> for String {
    fn from(value: TermId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub id: TermId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Filter {
    pub fn new(id: TermId) -> Self {
        Self { id, scope: None }
    }

    pub fn scoped(id: TermId, scope: EntityType) -> Self {
        Self {
            id,
            scope: Some(scope.as_str().to_string()),
        }
    }

    pub fn effective_scope(&self, default: EntityType) -> EntityType {
        EntityType::from_scope_or(self.scope.as_deref(), default)
    }
}

/// `ID` or `ID@scope`, the command-line shorthand for a filter.
impl FromStr for Filter {
    type Err = BeaconError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.rsplit_once('@') {
            Some((id, scope)) => Ok(Filter {
                id: id.parse()?,
                scope: Some(scope.to_string()),
            }),
            None => Ok(Filter::new(value.parse()?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Boolean,
    Count,
    Record,
    Aggregated,
}

impl Granularity {
    pub fn returns_records(&self) -> bool {
        matches!(self, Granularity::Record | Granularity::Aggregated)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Boolean => write!(f, "boolean"),
            Granularity::Count => write!(f, "count"),
            Granularity::Record => write!(f, "record"),
            Granularity::Aggregated => write!(f, "aggregated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPERCASE")]
pub enum IncludeResultsetResponses {
    Hit,
    Miss,
    All,
    #[default]
    None,
}

impl IncludeResultsetResponses {
    /// Whether per-variant detail has to be collected at all.
    pub fn collects_variants(&self) -> bool {
        matches!(
            self,
            IncludeResultsetResponses::Hit | IncludeResultsetResponses::All
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, rename = "requestedGranularity")]
    pub granularity: Granularity,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub include_resultset_responses: IncludeResultsetResponses,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_term_id_valid() {
        let term: TermId = " NCIT:C20197 ".parse().unwrap();
        assert_eq!(term.as_str(), "NCIT:C20197");
    }

    #[test]
    fn parse_term_id_rejects_missing_prefix() {
        assert_matches!(":C20197".parse::<TermId>(), Err(BeaconError::InvalidTermId(_)));
        assert_matches!("NCIT".parse::<TermId>(), Err(BeaconError::InvalidTermId(_)));
        assert_matches!("NCIT:".parse::<TermId>(), Err(BeaconError::InvalidTermId(_)));
    }

    #[test]
    fn unknown_scope_falls_back_to_default() {
        let filter = Filter {
            id: "UBERON:0000178".parse().unwrap(),
            scope: Some("samples".to_string()),
        };
        assert_eq!(
            filter.effective_scope(EntityType::Biosamples),
            EntityType::Biosamples
        );
        assert_matches!(
            "samples".parse::<EntityType>(),
            Err(BeaconError::InvalidFilterScope(_))
        );
    }

    #[test]
    fn filter_shorthand() {
        let filter: Filter = "NCIT:C20197@individuals".parse().unwrap();
        assert_eq!(filter.effective_scope(EntityType::Runs), EntityType::Individuals);
        let bare: Filter = "NCIT:C20197".parse().unwrap();
        assert_eq!(bare.scope, None);
    }

    #[test]
    fn entity_query_defaults() {
        let query: EntityQuery =
            serde_json::from_str(r#"{"filters":[{"id":"NCIT:C20197"}]}"#).unwrap();
        assert_eq!(query.granularity, Granularity::Boolean);
        assert_eq!(query.pagination, Pagination { skip: 0, limit: 100 });
        assert_eq!(
            query.include_resultset_responses,
            IncludeResultsetResponses::None
        );
    }
}
