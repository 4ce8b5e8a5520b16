//! Summary statistics for radius and bulk results.

use std::collections::BTreeMap;

use climate_risk_engine_models::{
    BandCounts, BulkSuccess, BulkSummary, EnrichedProperty, RadiusAnalytics, ScoreStats,
};
use climate_risk_models::RiskBand;

/// Mean, min, and max of `scores`, or `None` if empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_stats(scores: impl IntoIterator<Item = f64>) -> Option<ScoreStats> {
    let mut count = 0_usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for score in scores {
        count += 1;
        sum += score;
        min = min.min(score);
        max = max.max(score);
    }

    (count > 0).then(|| ScoreStats {
        average: sum / count as f64,
        min,
        max,
    })
}

/// Counts `scores` per risk band.
#[must_use]
pub fn band_counts(scores: impl IntoIterator<Item = f64>) -> BandCounts {
    let mut counts = BandCounts::default();
    for score in scores {
        counts.add(RiskBand::from_score(score));
    }
    counts
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn state_counts<'a>(states: impl IntoIterator<Item = Option<&'a str>>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for state in states.into_iter().flatten() {
        *counts.entry(state.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Analytics over every enriched result of a radius search.
///
/// Score statistics, bands, and the gradient only consider properties with
/// a current assessment. The gradient is the mean score within half the
/// radius minus the mean score beyond it, and is `None` unless both halves
/// have assessed properties.
#[must_use]
pub fn radius_analytics(properties: &[EnrichedProperty], radius_meters: f64) -> RadiusAnalytics {
    let assessed = properties
        .iter()
        .filter_map(|p| p.assessment.as_ref().map(|a| (p.distance_meters, a.overall_score)))
        .collect::<Vec<_>>();
    let scores = || assessed.iter().map(|(_, score)| *score);

    let half = radius_meters / 2.0;
    let (inner, outer): (Vec<&(f64, f64)>, Vec<&(f64, f64)>) = assessed.iter().partition(|(d, _)| *d <= half);
    let inner = inner.into_iter().map(|(_, s)| *s).collect::<Vec<_>>();
    let outer = outer.into_iter().map(|(_, s)| *s).collect::<Vec<_>>();
    let risk_gradient = mean(&inner)
        .zip(mean(&outer))
        .map(|(inner, outer)| inner - outer);

    let distances = properties
        .iter()
        .map(|p| p.distance_meters)
        .collect::<Vec<_>>();

    RadiusAnalytics {
        total_properties: properties.len(),
        assessed_properties: assessed.len(),
        scores: score_stats(scores()),
        band_counts: band_counts(scores()),
        average_distance_meters: mean(&distances),
        risk_gradient,
        state_counts: state_counts(properties.iter().map(|p| p.property.state.as_deref())),
    }
}

/// Summary of a bulk request.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bulk_summary(
    total_addresses: usize,
    successes: &[BulkSuccess],
    failed: usize,
) -> BulkSummary {
    let scores = || successes.iter().map(|s| s.assessment.overall_score);

    BulkSummary {
        total_addresses,
        successful: successes.len(),
        failed,
        success_rate: if total_addresses == 0 {
            0.0
        } else {
            successes.len() as f64 / total_addresses as f64
        },
        scores: score_stats(scores()),
        band_counts: band_counts(scores()),
        state_counts: state_counts(successes.iter().map(|s| s.property.state.as_deref())),
    }
}
