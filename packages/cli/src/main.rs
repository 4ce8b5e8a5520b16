#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the climate risk engine.
//!
//! Wires the engine to the Census geocoder, the HTTP climate data
//! aggregator, and in-memory stores, then runs a single lookup, radius
//! search, or bulk request and prints the result as JSON.
//!
//! The aggregator endpoint is read from `AGGREGATOR_BASE_URL` (and the
//! optional `AGGREGATOR_API_KEY`); the geocoder from `GEOCODER_BASE_URL`
//! and `GEOCODER_BENCHMARK`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use climate_risk_aggregator::http::HttpAggregator;
use climate_risk_config::EngineConfig;
use climate_risk_engine::clock::SystemClock;
use climate_risk_engine::{Collaborators, RiskEngine};
use climate_risk_engine_models::{AssessmentRequest, BulkRequest, RadiusSearchRequest};
use climate_risk_geocoder::census::CensusGateway;
use climate_risk_models::{Coordinates, HazardType, PropertyType, SubscriptionTier};
use climate_risk_spatial::BoundaryIndex;
use climate_risk_store::cache::MemoryRegionalCache;
use climate_risk_store::memory::MemoryStore;
use climate_risk_store::usage::LogUsageTracker;
use serde::Serialize;

// ---------------------------------------------------------------------------
// CLI definitions
// ---------------------------------------------------------------------------

/// Assess climate risk for properties.
#[derive(Parser)]
#[command(name = "climate_risk")]
#[command(about = "Assess climate risk for properties")]
struct Cli {
    /// Engine configuration TOML (defaults to the built-in configuration).
    #[arg(long)]
    config: Option<PathBuf>,

    /// `GeoJSON` boundary polygons used to label radius searches.
    #[arg(long)]
    boundaries: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Assess a single address or coordinate pair.
    Lookup {
        /// Free-text street address.
        #[arg(long, conflicts_with_all = ["lat", "lon"])]
        address: Option<String>,

        /// Latitude for a coordinate-only assessment.
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude for a coordinate-only assessment.
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Hazards to request (default: all).
        #[arg(long = "risk-type", value_delimiter = ',')]
        risk_types: Vec<HazardType>,
    },

    /// Search assessed properties around a point.
    Radius {
        /// Center latitude.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Center longitude.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Search radius in meters.
        #[arg(long, default_value_t = 1_000.0)]
        radius: f64,

        /// Only include properties scoring at least this much.
        #[arg(long)]
        threshold: Option<f64>,

        /// Only include properties of this type.
        #[arg(long)]
        property_type: Option<PropertyType>,

        /// 1-based result page (default: 1).
        #[arg(long)]
        page: Option<usize>,

        /// Results per page (default: configured page size).
        #[arg(long)]
        page_size: Option<usize>,

        /// Address file to bulk-assess before searching, one per line.
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Assess every address in a file, one per line.
    Bulk {
        /// Address file.
        file: PathBuf,

        /// Subscription tier to bill the request under.
        #[arg(long, default_value = "standard")]
        tier: SubscriptionTier,

        /// Hazards to request (default: all).
        #[arg(long = "risk-type", value_delimiter = ',')]
        risk_types: Vec<HazardType>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = build_engine(config, cli.boundaries.as_deref())?;

    match cli.command {
        Commands::Lookup {
            address,
            lat,
            lon,
            risk_types,
        } => {
            let request = AssessmentRequest {
                address,
                coordinates: lat.zip(lon).map(|(lat, lon)| Coordinates::new(lat, lon)),
                risk_types,
            };
            print_json(&engine.assess(&request).await?)?;
        }
        Commands::Radius {
            lat,
            lon,
            radius,
            threshold,
            property_type,
            page,
            page_size,
            seed,
        } => {
            if let Some(path) = seed {
                let addresses = read_addresses(&path).await?;
                log::info!("Seeding {} addresses from {}", addresses.len(), path.display());
                let seeded = engine
                    .bulk_assess(&BulkRequest {
                        addresses,
                        risk_types: vec![],
                        tier: SubscriptionTier::Enterprise,
                    })
                    .await?;
                for error in &seeded.errors {
                    log::warn!("Seed address '{}' failed: {}", error.address, error.error);
                }
            }

            let mut request = RadiusSearchRequest::new(Coordinates::new(lat, lon), radius);
            request.risk_threshold = threshold;
            request.property_type = property_type;
            request.page = page;
            request.page_size = page_size;
            print_json(&engine.radius_search(&request).await?)?;
        }
        Commands::Bulk {
            file,
            tier,
            risk_types,
        } => {
            let request = BulkRequest {
                addresses: read_addresses(&file).await?,
                risk_types,
                tier,
            };
            print_json(&engine.bulk_assess(&request).await?)?;
        }
    }

    Ok(())
}

fn build_engine(
    config: EngineConfig,
    boundaries: Option<&Path>,
) -> Result<RiskEngine, Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();

    let Some(aggregator) = HttpAggregator::from_env(client.clone()) else {
        return Err("AGGREGATOR_BASE_URL must be set to the climate data aggregator".into());
    };

    let boundaries = boundaries
        .map(BoundaryIndex::load)
        .transpose()?
        .map(Arc::new);
    if let Some(index) = &boundaries {
        log::info!("Loaded {} boundary regions", index.len());
    }

    let store = Arc::new(MemoryStore::new());

    Ok(RiskEngine::new(
        config,
        Collaborators {
            geocoder: Arc::new(CensusGateway::from_env(client)),
            aggregator: Arc::new(aggregator),
            properties: store.clone(),
            assessments: store,
            regional_cache: Arc::new(MemoryRegionalCache::new()),
            usage: Arc::new(LogUsageTracker),
            boundaries,
            clock: Arc::new(SystemClock),
        },
    ))
}

/// Reads one address per line, skipping blank lines and `#` comments.
async fn read_addresses(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(parse_addresses(&contents))
}

fn parse_addresses(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_file_skips_blanks_and_comments() {
        let parsed = parse_addresses("# portfolio\n1 Ocean Ave\n\n  2 Bay Rd  \n#3 Skip St\n");
        assert_eq!(parsed, vec!["1 Ocean Ave", "2 Bay Rd"]);
    }

    #[test]
    fn cli_parses_bulk_with_tier_and_hazards() {
        let cli = Cli::try_parse_from([
            "climate_risk",
            "bulk",
            "addresses.txt",
            "--tier",
            "enterprise",
            "--risk-type",
            "flood,wildfire",
        ])
        .unwrap();

        match cli.command {
            Commands::Bulk {
                tier, risk_types, ..
            } => {
                assert_eq!(tier, SubscriptionTier::Enterprise);
                assert_eq!(risk_types, vec![HazardType::Flood, HazardType::Wildfire]);
            }
            _ => panic!("expected bulk"),
        }
    }

    #[test]
    fn lookup_rejects_address_with_coordinates() {
        let parsed = Cli::try_parse_from([
            "climate_risk",
            "lookup",
            "--address",
            "1 Ocean Ave",
            "--lat",
            "25.0",
            "--lon",
            "-80.0",
        ]);
        assert!(parsed.is_err());
    }
}
