//! Validated flow records.
//!
//! A `FlowRecord` is one observed migration slice from an origin (a US state
//! or a non-US region) to a destination county, carrying the observed count,
//! the model-predicted count, optional demographic slice tags, and an
//! optional feature-attribution vector. Records are created once by the
//! ingest layer and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Demographic slice tags. Absent tags mean "unfiltered", not a category of
/// their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: Option<String>,
    pub income: Option<String>,
    pub education: Option<String>,
}

impl Demographics {
    pub fn is_empty(&self) -> bool {
        self.age.is_none() && self.income.is_none() && self.education.is_none()
    }
}

/// A feature-attribution vector aligned to the build's feature schema, plus
/// the model's scalar base value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub base_value: f64,
    pub values: Vec<f64>,
}

/// One validated origin→destination flow slice.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    /// Normalized origin code: 2-digit state FIPS or a region code.
    pub origin: String,
    /// Five-digit destination county GEOID.
    pub dest: String,
    pub observed: f64,
    pub predicted: f64,
    pub demographics: Demographics,
    pub attribution: Option<Attribution>,
}

impl FlowRecord {
    /// Stable record key, unique within a build: origin + destination, plus
    /// the demographic tags when any are present.
    pub fn id(&self) -> String {
        if self.demographics.is_empty() {
            return format!("{}-{}", self.origin, self.dest);
        }
        let d = &self.demographics;
        format!(
            "{}-{}-{}-{}-{}",
            self.origin,
            self.dest,
            d.age.as_deref().unwrap_or("any"),
            d.income.as_deref().unwrap_or("any"),
            d.education.as_deref().unwrap_or("any"),
        )
    }
}
