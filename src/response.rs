use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Pagination;
use crate::entities::FilteringTerm;
use crate::error::BeaconError;

pub const STILL_RUNNING_MESSAGE: &str = "Query still running.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub message: String,
}

/// Granularity-shaped response body. Variant order matters for deserializing:
/// the richest shape is tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BeaconResponse {
    ResultSet {
        exists: bool,
        total: u64,
        results: Vec<Value>,
        pagination: Pagination,
    },
    Count {
        exists: bool,
        count: u64,
    },
    Boolean {
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<ResponseInfo>,
    },
}

impl BeaconResponse {
    pub fn boolean(exists: bool) -> Self {
        BeaconResponse::Boolean { exists, info: None }
    }

    pub fn count(count: u64) -> Self {
        BeaconResponse::Count {
            exists: count > 0,
            count,
        }
    }

    pub fn result_set<T: Serialize>(
        exists: bool,
        total: u64,
        records: &[T],
        pagination: Pagination,
    ) -> Result<Self, BeaconError> {
        let results = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| BeaconError::Serialization(err.to_string()))?;
        Ok(BeaconResponse::ResultSet {
            exists,
            total,
            results,
            pagination,
        })
    }

    pub fn still_running() -> Self {
        BeaconResponse::Boolean {
            exists: false,
            info: Some(ResponseInfo {
                message: STILL_RUNNING_MESSAGE.to_string(),
            }),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            BeaconResponse::ResultSet { exists, .. }
            | BeaconResponse::Count { exists, .. }
            | BeaconResponse::Boolean { exists, .. } => *exists,
        }
    }

    pub fn is_still_running(&self) -> bool {
        matches!(
            self,
            BeaconResponse::Boolean { info: Some(info), .. } if info.message == STILL_RUNNING_MESSAGE
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringTermsResponse {
    pub filtering_terms: Vec<FilteringTerm>,
    pub pagination: Pagination,
}

/// A variant search answer: either freshly computed or served from the job
/// cache. The payload text is what was stored and is returned unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantResponse {
    pub payload: String,
    pub cached: bool,
}

impl VariantResponse {
    pub fn parse(&self) -> Result<BeaconResponse, BeaconError> {
        serde_json::from_str(&self.payload).map_err(|err| BeaconError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn shapes_per_granularity() {
        assert_eq!(
            serde_json::to_value(BeaconResponse::boolean(true)).unwrap(),
            json!({"exists": true})
        );
        assert_eq!(
            serde_json::to_value(BeaconResponse::count(0)).unwrap(),
            json!({"exists": false, "count": 0})
        );
        let rows = BeaconResponse::result_set(true, 1, &[json!({"id": "i1"})], Pagination::default()).unwrap();
        assert_eq!(
            serde_json::to_value(rows).unwrap(),
            json!({
                "exists": true,
                "total": 1,
                "results": [{"id": "i1"}],
                "pagination": {"skip": 0, "limit": 100}
            })
        );
    }

    #[test]
    fn still_running_round_trips() {
        let text = serde_json::to_string(&BeaconResponse::still_running()).unwrap();
        assert_eq!(text, r#"{"exists":false,"info":{"message":"Query still running."}}"#);
        let parsed: BeaconResponse = serde_json::from_str(&text).unwrap();
        assert!(parsed.is_still_running());
        assert_matches!(
            serde_json::from_str::<BeaconResponse>(r#"{"exists":true,"count":3}"#).unwrap(),
            BeaconResponse::Count { count: 3, .. }
        );
    }
}
