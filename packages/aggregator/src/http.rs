//! HTTP client for a JSON climate data aggregation service.
//!
//! - Single: `POST {base_url}/aggregate`
//! - Batch: `POST {base_url}/aggregate/batch`
//!
//! Risk payloads arrive as flat objects keyed `overall_risk_score` and
//! `<hazard>_risk_score`. Unknown hazard keys are skipped with a debug log
//! so a provider adding a hazard never breaks parsing.

use async_trait::async_trait;
use climate_risk_models::{Coordinates, HazardScores, HazardType};
use serde_json::{Value, json};

use crate::retry::{self, RetryPolicy, is_retryable_status};
use crate::{
    AggregatePoint, AggregateSuccess, BatchAggregateItem, BatchAggregateOutcome,
    ClimateDataAggregator, ClimateDataFailure, FailureKind, RiskData,
};

/// Errors from the aggregator HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The aggregator answered with a non-success status.
    #[error("Aggregator returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Parsed body, if it was JSON.
        body: Option<Value>,
    },

    /// Body was JSON but not in the expected shape.
    #[error("Unexpected aggregator payload: {message}")]
    Parse {
        /// Description of the problem.
        message: String,
    },
}

impl From<AggregatorError> for ClimateDataFailure {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::Http(ref http) => Self {
                kind: FailureKind::Unavailable,
                retryable: http.is_timeout() || http.is_connect(),
                message: e.to_string(),
                error_source: None,
            },
            AggregatorError::Status {
                status,
                body: Some(ref body),
            } if body.get("error").is_some() => {
                let retryable = reqwest::StatusCode::from_u16(status)
                    .is_ok_and(is_retryable_status);
                parse_failure(body, retryable)
            }
            AggregatorError::Status { status, .. } => {
                let retryable = reqwest::StatusCode::from_u16(status)
                    .is_ok_and(is_retryable_status);
                Self {
                    kind: if retryable {
                        FailureKind::Unavailable
                    } else {
                        FailureKind::Rejected
                    },
                    retryable,
                    message: e.to_string(),
                    error_source: None,
                }
            }
            AggregatorError::Json(_) | AggregatorError::Parse { .. } => Self {
                kind: FailureKind::InvalidResponse,
                retryable: false,
                message: e.to_string(),
                error_source: None,
            },
        }
    }
}

/// [`ClimateDataAggregator`] backed by an HTTP JSON service.
#[derive(Debug, Clone)]
pub struct HttpAggregator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpAggregator {
    /// Creates a client against `base_url`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        }
    }

    /// Creates a client from `AGGREGATOR_BASE_URL` and the optional
    /// `AGGREGATOR_API_KEY`. Returns `None` when no base URL is set.
    #[must_use]
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let base_url = std::env::var("AGGREGATOR_BASE_URL").ok()?;
        if base_url.is_empty() {
            return None;
        }
        let api_key = std::env::var("AGGREGATOR_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        Some(Self::new(client, &base_url, api_key, RetryPolicy::default()))
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value, AggregatorError> {
        let url = format!("{}{path}", self.base_url);
        retry::send_json(&self.retry, || {
            let req = self.client.post(&url).json(payload);
            match &self.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        })
        .await
    }
}

#[async_trait]
impl ClimateDataAggregator for HttpAggregator {
    async fn aggregate(
        &self,
        coordinates: Coordinates,
        risk_types: &[HazardType],
    ) -> Result<AggregateSuccess, ClimateDataFailure> {
        let payload = json!({
            "latitude": coordinates.latitude,
            "longitude": coordinates.longitude,
            "riskTypes": risk_types,
        });
        let body = self.post("/aggregate", &payload).await?;
        parse_single_response(&body)
    }

    async fn batch_aggregate(
        &self,
        points: &[AggregatePoint],
        risk_types: &[HazardType],
    ) -> Result<BatchAggregateOutcome, ClimateDataFailure> {
        if points.is_empty() {
            return Ok(BatchAggregateOutcome::default());
        }

        log::info!("Sending batch of {} points to aggregator...", points.len());

        let payload = json!({
            "points": points,
            "riskTypes": risk_types,
        });
        let body = self.post("/aggregate/batch", &payload).await?;
        Ok(parse_batch_response(&body)?)
    }
}

/// Reads a non-negative counter field, defaulting to zero.
fn counter(body: &Value, key: &str) -> u32 {
    body.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Builds a failure from an aggregator error body.
fn parse_failure(body: &Value, default_retryable: bool) -> ClimateDataFailure {
    let retryable = body
        .get("retryable")
        .and_then(Value::as_bool)
        .unwrap_or(default_retryable);

    ClimateDataFailure {
        kind: if retryable {
            FailureKind::Unavailable
        } else {
            FailureKind::Rejected
        },
        message: body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("aggregator reported failure without a message")
            .to_string(),
        retryable,
        error_source: body
            .get("error_source")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

/// Parses a flat `riskData` object plus its `sources` array.
fn parse_risk_data(
    risk_data: &Value,
    sources: Option<&Value>,
) -> Result<RiskData, AggregatorError> {
    let fields = risk_data.as_object().ok_or_else(|| AggregatorError::Parse {
        message: "riskData is not an object".to_string(),
    })?;

    let overall_score = fields
        .get("overall_risk_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| AggregatorError::Parse {
            message: "riskData missing numeric overall_risk_score".to_string(),
        })?;

    let mut hazard_scores = HazardScores::new();
    for (key, value) in fields {
        if key == "overall_risk_score" {
            continue;
        }
        let Some(hazard) = HazardType::from_score_key(key) else {
            log::debug!("Skipping unrecognized aggregator field '{key}'");
            continue;
        };
        if let Some(score) = value.as_f64() {
            hazard_scores.insert(hazard, score);
        }
    }

    let sources = sources
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(RiskData {
        overall_score,
        hazard_scores,
        sources,
    })
}

/// Parses the single-point response.
fn parse_single_response(body: &Value) -> Result<AggregateSuccess, ClimateDataFailure> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(parse_failure(body, false));
    }

    let risk_data = body.get("riskData").ok_or_else(|| {
        ClimateDataFailure::from(AggregatorError::Parse {
            message: "successful response missing riskData".to_string(),
        })
    })?;

    Ok(AggregateSuccess {
        risk_data: parse_risk_data(risk_data, body.get("sources"))?,
        external_api_calls: counter(body, "external_api_calls"),
        cache_hits: counter(body, "cache_hits"),
        cache_misses: counter(body, "cache_misses"),
    })
}

/// Parses the batch response. Individual malformed rows become per-row
/// failures; only a missing `results` array fails the whole batch.
fn parse_batch_response(body: &Value) -> Result<BatchAggregateOutcome, AggregatorError> {
    let rows = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| AggregatorError::Parse {
            message: "batch response missing results array".to_string(),
        })?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(address) = row.get("address").and_then(Value::as_str) else {
            log::warn!("Aggregator batch row without address, skipping");
            continue;
        };

        let outcome = if row.get("success").and_then(Value::as_bool) == Some(true) {
            row.get("riskData")
                .ok_or_else(|| AggregatorError::Parse {
                    message: "row missing riskData".to_string(),
                })
                .and_then(|data| parse_risk_data(data, row.get("sources")))
                .map_err(ClimateDataFailure::from)
        } else {
            Err(parse_failure(row, false))
        };

        results.push(BatchAggregateItem {
            address: address.to_string(),
            outcome,
        });
    }

    Ok(BatchAggregateOutcome {
        results,
        external_api_calls: counter(body, "external_api_calls"),
        cache_hits: counter(body, "cache_hits"),
        cache_misses: counter(body, "cache_misses"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_single_response() {
        let body = json!({
            "success": true,
            "riskData": {
                "overall_risk_score": 72,
                "flood_risk_score": 88.5,
                "hurricane_risk_score": 91,
                "wildfire_risk_score": 3,
                "volcano_risk_score": 1,
                "earthquake_risk_score": null
            },
            "sources": ["fema_nfhl", "noaa"],
            "external_api_calls": 2,
            "cache_hits": 1,
            "cache_misses": 2
        });

        let success = parse_single_response(&body).unwrap();
        assert!((success.risk_data.overall_score - 72.0).abs() < f64::EPSILON);
        assert_eq!(success.risk_data.hazard_scores.len(), 3);
        assert_eq!(
            success.risk_data.hazard_scores.get(&HazardType::Flood),
            Some(&88.5)
        );
        assert!(
            !success
                .risk_data
                .hazard_scores
                .contains_key(&HazardType::Earthquake)
        );
        assert_eq!(success.risk_data.sources, vec!["fema_nfhl", "noaa"]);
        assert_eq!(success.external_api_calls, 2);
        assert_eq!(success.cache_hits, 1);
    }

    #[test]
    fn single_failure_carries_aggregator_classification() {
        let body = json!({
            "success": false,
            "error": "NOAA upstream timed out",
            "error_source": "noaa",
            "retryable": true
        });

        let failure = parse_single_response(&body).unwrap_err();
        assert!(failure.retryable);
        assert_eq!(failure.kind, FailureKind::Unavailable);
        assert_eq!(failure.error_source.as_deref(), Some("noaa"));
        assert_eq!(failure.message, "NOAA upstream timed out");
    }

    #[test]
    fn missing_overall_score_is_invalid_response() {
        let body = json!({
            "success": true,
            "riskData": { "flood_risk_score": 10 }
        });
        let failure = parse_single_response(&body).unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidResponse);
        assert!(!failure.retryable);
    }

    #[test]
    fn parses_batch_with_mixed_rows() {
        let body = json!({
            "results": [
                {
                    "address": "1 ocean ave",
                    "success": true,
                    "riskData": { "overall_risk_score": 72, "flood_risk_score": 80 }
                },
                {
                    "address": "2 ocean ave",
                    "success": false,
                    "error": "no coverage",
                    "retryable": false
                },
                {
                    "address": "3 ocean ave",
                    "success": true
                },
                { "success": true }
            ],
            "external_api_calls": 4,
            "cache_hits": 0,
            "cache_misses": 3
        });

        let outcome = parse_batch_response(&body).unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].outcome.is_ok());
        let rejected = outcome.results[1].outcome.as_ref().unwrap_err();
        assert_eq!(rejected.kind, FailureKind::Rejected);
        let malformed = outcome.results[2].outcome.as_ref().unwrap_err();
        assert_eq!(malformed.kind, FailureKind::InvalidResponse);
        assert_eq!(outcome.external_api_calls, 4);
        assert_eq!(outcome.cache_misses, 3);
    }

    #[test]
    fn batch_without_results_is_parse_error() {
        let body = json!({ "error": "overloaded" });
        assert!(matches!(
            parse_batch_response(&body),
            Err(AggregatorError::Parse { .. })
        ));
    }

    #[test]
    fn status_errors_map_to_retryable_failures() {
        let failure = ClimateDataFailure::from(AggregatorError::Status {
            status: 503,
            body: None,
        });
        assert!(failure.retryable);
        assert_eq!(failure.kind, FailureKind::Unavailable);

        let failure = ClimateDataFailure::from(AggregatorError::Status {
            status: 400,
            body: Some(json!({ "error": "latitude out of range" })),
        });
        assert!(!failure.retryable);
        assert_eq!(failure.kind, FailureKind::Rejected);
        assert_eq!(failure.message, "latitude out of range");
    }
}
