//! Flow-record CSV parsing and validation.
//!
//! The flow source is an untrusted CSV. Each row either becomes a validated
//! `FlowRecord` or bumps a reject counter; a malformed row never aborts the
//! batch. Two dataset variants share this reader:
//!
//! - demographic-sliced flows: `origin`, `dest`, `flow`, plus optional
//!   `age`/`income`/`education` tag columns
//! - observed/predicted flows with attribution: `origin_state_code`,
//!   `dest_geoid` (+ declared `dest_state_code`/`dest_county_code`),
//!   `observed_movers`, `predicted_movers`, and `shap_*` feature columns
//!
//! The attribution column set (prefix-matched, excluding the scalar
//! base-value column) defines the feature schema for the entire build, in
//! header order.

use anyhow::{Context, Result};
use flowcache_model::codes;
use flowcache_model::record::{Attribution, Demographics, FlowRecord};
use std::collections::HashMap;
use std::path::Path;

/// Ingest configuration. The attribution prefix is configurable so the
/// reader is not married to one model pipeline's column naming.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub attr_prefix: String,
    pub attr_base_column: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            attr_prefix: "shap_".to_string(),
            attr_base_column: "shap_base_value".to_string(),
        }
    }
}

/// Per-reason reject counters. The build report surfaces these; nothing else
/// ever sees a rejected row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    /// Origin or destination identifier missing/empty.
    pub missing_identifier: u64,
    /// Observed or predicted count failed to parse to a finite number.
    pub non_finite: u64,
    /// Destination geoid inconsistent with its declared state/county codes.
    pub geoid_mismatch: u64,
}

impl RejectCounts {
    pub fn total(&self) -> u64 {
        self.missing_identifier + self.non_finite + self.geoid_mismatch
    }
}

/// The outcome of one ingest pass.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub records: Vec<FlowRecord>,
    /// Ordered feature ids (prefix stripped), empty when the dataset variant
    /// has no attribution columns. Stable for the whole build.
    pub schema: Vec<String>,
    pub rejected: RejectCounts,
}

enum Reject {
    MissingIdentifier,
    NonFinite,
    GeoidMismatch,
}

/// Read and validate every flow row in `path`.
pub fn read_flow_records(path: &Path, options: &IngestOptions) -> Result<IngestReport> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening flow source {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", path.display()))?
        .clone();
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_string(), i))
        .collect();

    // Attribution schema: prefix-matched columns minus the base value, in
    // header order.
    let attr_columns: Vec<(String, usize)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with(&options.attr_prefix) && *h != options.attr_base_column)
        .map(|(i, h)| (h[options.attr_prefix.len()..].to_string(), i))
        .collect();
    let schema: Vec<String> = attr_columns.iter().map(|(id, _)| id.clone()).collect();
    let base_idx = columns.get(options.attr_base_column.as_str()).copied();

    let mut records = Vec::new();
    let mut rejected = RejectCounts::default();

    for row in reader.records() {
        let row = row.with_context(|| format!("reading row from {}", path.display()))?;
        match parse_row(&row, &columns, &attr_columns, base_idx) {
            Ok(record) => records.push(record),
            Err(Reject::MissingIdentifier) => rejected.missing_identifier += 1,
            Err(Reject::NonFinite) => rejected.non_finite += 1,
            Err(Reject::GeoidMismatch) => rejected.geoid_mismatch += 1,
        }
    }

    if rejected.total() > 0 {
        tracing::warn!(
            source = %path.display(),
            rejected = rejected.total(),
            missing_identifier = rejected.missing_identifier,
            non_finite = rejected.non_finite,
            geoid_mismatch = rejected.geoid_mismatch,
            "skipped malformed flow rows"
        );
    }

    Ok(IngestReport {
        records,
        schema,
        rejected,
    })
}

fn parse_row(
    row: &csv::StringRecord,
    columns: &HashMap<String, usize>,
    attr_columns: &[(String, usize)],
    base_idx: Option<usize>,
) -> std::result::Result<FlowRecord, Reject> {
    let field = |names: &[&str]| -> Option<&str> {
        names
            .iter()
            .find_map(|n| columns.get(*n).and_then(|&i| row.get(i)))
            .filter(|s| !s.is_empty())
    };

    let origin = field(&["origin_state_code", "origin", "origin_geoid"])
        .and_then(codes::normalize_state)
        .ok_or(Reject::MissingIdentifier)?;
    let dest = field(&["dest_geoid", "dest"])
        .and_then(|s| codes::normalize_county(s))
        .ok_or(Reject::MissingIdentifier)?;

    let (dest_state, dest_county) = codes::split_geoid(&dest).ok_or(Reject::GeoidMismatch)?;

    // Cross-field integrity: when the source declares the split explicitly,
    // it must agree with the geoid. The source is untrusted.
    if let Some(declared) = field(&["dest_state_code"]).and_then(codes::normalize_state) {
        if declared != dest_state {
            return Err(Reject::GeoidMismatch);
        }
    }
    if let Some(declared) = field(&["dest_county_code"]).map(codes::pad_county_suffix) {
        if declared != dest_county {
            return Err(Reject::GeoidMismatch);
        }
    }

    let observed = field(&["observed_movers", "flow", "observed"])
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(Reject::NonFinite)?;
    // Datasets without a model pass-through have no predicted column; the
    // predicted value then mirrors the observed one. A present-but-broken
    // predicted value still rejects the row.
    let predicted = match field(&["predicted_movers", "predicted"]) {
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(Reject::NonFinite)?,
        None => observed,
    };

    let demographics = Demographics {
        age: field(&["age"]).map(str::to_string),
        income: field(&["income"]).map(str::to_string),
        education: field(&["education"]).map(str::to_string),
    };

    let attribution = if attr_columns.is_empty() {
        None
    } else {
        let values = attr_columns
            .iter()
            .map(|&(_, i)| parse_or_zero(row.get(i)))
            .collect();
        let base_value = parse_or_zero(base_idx.and_then(|i| row.get(i)));
        Some(Attribution { base_value, values })
    };

    Ok(FlowRecord {
        origin,
        dest,
        observed,
        predicted,
        demographics,
        attribution,
    })
}

fn parse_or_zero(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_attribution_variant() {
        let csv = "\
origin_state_code,dest_geoid,dest_state_code,dest_county_code,observed_movers,predicted_movers,shap_base_value,shap_median_income,shap_unemployment
06,06037,06,037,100,95,0.5,1.25,-0.75
036,06037,06,037,50,60,0.5,0.5,0.25
";
        let f = write_csv(csv);
        let report = read_flow_records(f.path(), &IngestOptions::default()).unwrap();

        assert_eq!(report.schema, vec!["median_income", "unemployment"]);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.rejected.total(), 0);

        let first = &report.records[0];
        assert_eq!(first.origin, "06");
        assert_eq!(first.dest, "06037");
        assert_eq!(first.observed, 100.0);
        assert_eq!(first.predicted, 95.0);
        let attr = first.attribution.as_ref().unwrap();
        assert_eq!(attr.base_value, 0.5);
        assert_eq!(attr.values, vec![1.25, -0.75]);

        // "036" normalizes to the two-digit FIPS
        assert_eq!(report.records[1].origin, "36");
    }

    #[test]
    fn rejects_geoid_mismatch() {
        let csv = "\
origin_state_code,dest_geoid,dest_state_code,dest_county_code,observed_movers,predicted_movers
06,06037,36,037,100,95
";
        let f = write_csv(csv);
        let report = read_flow_records(f.path(), &IngestOptions::default()).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.rejected.geoid_mismatch, 1);
        assert_eq!(report.rejected.total(), 1);
    }

    #[test]
    fn rejects_non_finite_counts() {
        let csv = "\
origin_state_code,dest_geoid,observed_movers,predicted_movers
06,06037,abc,95
36,06037,50,NaN
48,06037,75,80
";
        let f = write_csv(csv);
        let report = read_flow_records(f.path(), &IngestOptions::default()).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.rejected.non_finite, 2);
    }

    #[test]
    fn demographic_variant_defaults_predicted() {
        let csv = "\
origin,dest,flow,age,income,education
06,06037,12,age_25_34,,edu_ba
";
        let f = write_csv(csv);
        let report = read_flow_records(f.path(), &IngestOptions::default()).unwrap();
        let r = &report.records[0];
        assert_eq!(r.predicted, r.observed);
        assert_eq!(r.demographics.age.as_deref(), Some("age_25_34"));
        assert_eq!(r.demographics.income, None);
        assert_eq!(r.demographics.education.as_deref(), Some("edu_ba"));
        assert!(r.attribution.is_none());
        assert!(report.schema.is_empty());
    }
}
