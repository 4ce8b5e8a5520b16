//! US Census Bureau Geocoder gateway.
//!
//! Supports both single-address and batch geocoding via the Census Bureau's
//! free geocoding service. No API key required.
//!
//! - Single: `GET /geocoder/locations/onelineaddress`
//! - Batch: `POST /geocoder/locations/addressbatch` (up to 10,000 rows)
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use std::time::Duration;

use async_trait::async_trait;
use climate_risk_models::GeocodeAccuracy;
use reqwest::multipart;

use crate::address::split_matched_address;
use crate::{
    BatchGeocodeItem, BatchGeocodeOutcome, GeocodeError, GeocodeFailure, GeocodeMatch,
    GeocodingGateway,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://geocoding.geo.census.gov/geocoder";

/// Default address benchmark.
pub const DEFAULT_BENCHMARK: &str = "Public_AR_Current";

/// Maximum number of addresses per batch request (Census Bureau limit).
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Source tag stamped on every match from this gateway.
const SOURCE: &str = "census";

/// [`GeocodingGateway`] backed by the Census Bureau geocoder.
#[derive(Debug, Clone)]
pub struct CensusGateway {
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
}

impl CensusGateway {
    /// Creates a gateway against `base_url` using `benchmark`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, benchmark: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            benchmark: benchmark.to_string(),
        }
    }

    /// Creates a gateway from `GEOCODER_BASE_URL` / `GEOCODER_BENCHMARK`,
    /// falling back to the public Census endpoint.
    #[must_use]
    pub fn from_env(client: reqwest::Client) -> Self {
        let base_url =
            std::env::var("GEOCODER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let benchmark =
            std::env::var("GEOCODER_BENCHMARK").unwrap_or_else(|_| DEFAULT_BENCHMARK.to_string());
        Self::new(client, &base_url, &benchmark)
    }

    async fn geocode_one_line(&self, address: &str) -> Result<Option<GeocodeMatch>, GeocodeError> {
        let url = format!("{}/locations/onelineaddress", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("address", address),
                ("benchmark", self.benchmark.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(GeocodeError::Parse {
                message: format!("Census returned status {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        parse_single_response(&body)
    }

    async fn geocode_batch_csv(&self, addresses: &[String]) -> Result<String, GeocodeError> {
        let csv_content = build_batch_csv(addresses)?;

        let form = multipart::Form::new()
            .text("benchmark", self.benchmark.clone())
            .part(
                "addressFile",
                multipart::Part::bytes(csv_content)
                    .file_name("addresses.csv")
                    .mime_str("text/csv")
                    .map_err(|e| GeocodeError::Parse {
                        message: format!("Failed to set MIME type: {e}"),
                    })?,
            );

        let url = format!("{}/locations/addressbatch", self.base_url);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(Duration::from_secs(180))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GeocodeError::Parse {
                message: format!("Census batch returned status {}", resp.status()),
            });
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl GeocodingGateway for CensusGateway {
    async fn geocode(&self, address: &str) -> Result<GeocodeMatch, GeocodeFailure> {
        match self.geocode_one_line(address).await? {
            Some(found) => Ok(found),
            None => Err(GeocodeFailure::NoMatch {
                address: address.to_string(),
            }),
        }
    }

    async fn batch_geocode(
        &self,
        addresses: &[String],
    ) -> Result<BatchGeocodeOutcome, GeocodeFailure> {
        let mut outcome = BatchGeocodeOutcome::default();

        for chunk in addresses.chunks(MAX_BATCH_SIZE) {
            log::info!(
                "Sending batch of {} addresses to Census geocoder...",
                chunk.len()
            );
            let body = self.geocode_batch_csv(chunk).await?;
            outcome.api_calls += 1;

            let rows = parse_batch_response(&body)?;
            log::info!(
                "Census batch: {} matched, {} unmatched",
                rows.iter().filter(|(_, m)| m.is_some()).count(),
                rows.iter().filter(|(_, m)| m.is_none()).count(),
            );

            for (id, matched) in rows {
                let Some(address) = id.parse::<usize>().ok().and_then(|i| chunk.get(i)) else {
                    log::warn!("Census batch returned unknown row id '{id}'");
                    continue;
                };
                let outcome_row = matched.ok_or_else(|| GeocodeFailure::NoMatch {
                    address: address.clone(),
                });
                outcome.results.push(BatchGeocodeItem {
                    address: address.clone(),
                    outcome: outcome_row,
                });
            }
        }

        Ok(outcome)
    }
}

/// Builds a [`GeocodeMatch`] from Census coordinates and matched address.
fn build_match(
    latitude: f64,
    longitude: f64,
    matched_address: Option<String>,
    accuracy: GeocodeAccuracy,
) -> GeocodeMatch {
    let parts = matched_address
        .as_deref()
        .map(split_matched_address)
        .unwrap_or_default();

    GeocodeMatch {
        latitude,
        longitude,
        matched_address,
        city: parts.city,
        state: parts.state,
        zip: parts.zip,
        accuracy,
        source: SOURCE.to_string(),
    }
}

/// Parses the JSON response from the one-line-address endpoint.
fn parse_single_response(body: &serde_json::Value) -> Result<Option<GeocodeMatch>, GeocodeError> {
    let matches =
        body["result"]["addressMatches"]
            .as_array()
            .ok_or_else(|| GeocodeError::Parse {
                message: "Missing addressMatches array".to_string(),
            })?;

    let Some(first) = matches.first() else {
        return Ok(None);
    };

    let x = first["coordinates"]["x"]
        .as_f64()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing x coordinate".to_string(),
        })?;
    let y = first["coordinates"]["y"]
        .as_f64()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing y coordinate".to_string(),
        })?;

    let matched_address = first["matchedAddress"].as_str().map(String::from);

    // Single-line matches are TIGER address-range interpolations.
    Ok(Some(build_match(
        y,
        x,
        matched_address,
        GeocodeAccuracy::Interpolated,
    )))
}

/// Builds the batch upload: one `ID,Street,City,State,ZIP` row per
/// address, no header row. The whole free-text address goes in the street
/// column and the row id is the address's position in `addresses`.
fn build_batch_csv(addresses: &[String]) -> Result<Vec<u8>, GeocodeError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    for (i, address) in addresses.iter().enumerate() {
        writer.write_record([i.to_string().as_str(), address.as_str(), "", "", ""])?;
    }

    writer
        .into_inner()
        .map_err(|e| GeocodeError::Csv(csv::Error::from(e.into_error())))
}

/// Parses the CSV response from the batch endpoint into `(row id, match)`
/// pairs. Rows without a usable match carry `None`.
///
/// Response format (one row per input):
/// ```text
/// "ID","InputAddress","Match"|"No_Match","Exact"|"Non_Exact","MatchedAddr","lng,lat","TigerLine","Side"
/// ```
fn parse_batch_response(
    body: &str,
) -> Result<Vec<(String, Option<GeocodeMatch>)>, GeocodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(id) = record.get(0) else {
            continue;
        };
        if record.len() < 3 {
            continue;
        }

        let matched = if record.get(2) == Some("Match") {
            let accuracy = if record.get(3) == Some("Exact") {
                GeocodeAccuracy::Interpolated
            } else {
                GeocodeAccuracy::Approximate
            };
            let matched_address = record
                .get(4)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            record
                .get(5)
                .and_then(parse_coord_pair)
                .map(|(lng, lat)| build_match(lat, lng, matched_address, accuracy))
        } else {
            None
        };

        rows.push((id.to_string(), matched));
    }

    Ok(rows)
}

/// Parses a "lng,lat" coordinate pair from Census batch response.
fn parse_coord_pair(s: &str) -> Option<(f64, f64)> {
    let (lng, lat) = s.split_once(',')?;
    let lng = lng.trim().parse::<f64>().ok()?;
    let lat = lat.trim().parse::<f64>().ok()?;
    Some((lng, lat))
}
