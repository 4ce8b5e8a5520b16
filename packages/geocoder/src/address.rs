//! Address normalization.
//!
//! Two address strings refer to the same property when their normalized
//! forms are equal. Normalization is deliberately conservative: surrounding
//! whitespace is trimmed, internal runs of whitespace collapse to a single
//! space, and the result is lower-cased. Abbreviations are not expanded, so
//! `"1 Ocean Ave"` and `"1 Ocean Avenue"` remain distinct keys.

/// Inputs that are never geocodable, compared after normalization.
static SKIP_PATTERNS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "not available",
    "undetermined",
    "unspecified",
];

/// Normalizes an address into its store key.
///
/// Returns `None` for empty input and placeholder values such as
/// `"UNKNOWN"` or `"N/A"`.
#[must_use]
pub fn normalize_address(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let normalized = collapsed.to_lowercase();

    if normalized.is_empty() || SKIP_PATTERNS.contains(&normalized.as_str()) {
        return None;
    }

    Some(normalized)
}

/// Components of a provider's canonical matched address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchedParts {
    /// Street line.
    pub street: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
    /// ZIP code.
    pub zip: Option<String>,
}

/// Splits a comma-separated matched address such as
/// `"4600 SILVER HILL RD, WASHINGTON, DC, 20233"` into its components.
///
/// Missing trailing components are `None`; empty components are skipped.
#[must_use]
pub fn split_matched_address(matched: &str) -> MatchedParts {
    let mut parts = matched.split(',').map(str::trim);
    let mut next = || {
        parts
            .next()
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
    };

    MatchedParts {
        street: next(),
        city: next(),
        state: next(),
        zip: next(),
    }
}
