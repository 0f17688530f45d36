//! Query filters and their canonical resolution.
//!
//! A `FlowFilter` is what callers hand in: everything optional. Resolution
//! fills defaults, normalizes geographic codes, and produces a stable
//! signature for memoization — two filters that differ only in construction
//! order or un-normalized codes share one signature.

use flowcache_model::codes;
use serde::Serialize;

/// Flow direction selector. `Net` is only meaningful against summary
/// totals; a raw record has a single direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    In,
    Out,
    Net,
}

/// Selects between a record's observed and model-predicted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Observed,
    Predicted,
}

impl ValueType {
    pub fn is_predicted(self) -> bool {
        matches!(self, ValueType::Predicted)
    }
}

/// Attribution-feature filter: keep candidates whose |attribution| for one
/// feature sits at or above a percentile of the current candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureFilter {
    /// Index into the build's feature schema.
    pub index: usize,
    /// Percentile of magnitude, 0–100.
    pub min_percentile: f64,
}

/// User-supplied filters; unset fields resolve to defaults.
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub metric: Option<Metric>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub value_type: Option<ValueType>,
    pub min_value: Option<f64>,
    /// Result cap; 0 means unbounded.
    pub top_n: Option<usize>,
    pub age: Option<String>,
    pub income: Option<String>,
    pub education: Option<String>,
    pub feature: Option<FeatureFilter>,
}

/// A fully resolved filter set. Field order is fixed, so serializing it
/// yields the canonical memoization key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedFilter {
    pub metric: Metric,
    pub state: Option<String>,
    pub county: Option<String>,
    pub value_type: ValueType,
    pub min_value: f64,
    pub top_n: usize,
    pub age: Option<String>,
    pub income: Option<String>,
    pub education: Option<String>,
    pub feature: Option<FeatureFilter>,
}

impl FlowFilter {
    pub fn resolve(&self, default_top_n: usize) -> ResolvedFilter {
        ResolvedFilter {
            metric: self.metric.unwrap_or_default(),
            state: self
                .state
                .as_deref()
                .and_then(codes::normalize_state),
            county: self
                .county
                .as_deref()
                .and_then(codes::normalize_county),
            value_type: self.value_type.unwrap_or_default(),
            min_value: self.min_value.unwrap_or(0.0),
            top_n: self.top_n.unwrap_or(default_top_n),
            age: demographic_tag(self.age.as_deref()),
            income: demographic_tag(self.income.as_deref()),
            education: demographic_tag(self.education.as_deref()),
            feature: self.feature,
        }
    }
}

impl ResolvedFilter {
    /// Canonical memoization key.
    pub fn signature(&self) -> String {
        // struct field order is fixed; serde_json preserves it
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The sentinel "all" means unfiltered, same as absent.
fn demographic_tag(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| !s.is_empty() && *s != "all").map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let r = FlowFilter::default().resolve(200);
        assert_eq!(r.metric, Metric::In);
        assert_eq!(r.value_type, ValueType::Observed);
        assert_eq!(r.min_value, 0.0);
        assert_eq!(r.top_n, 200);
        assert_eq!(r.state, None);
    }

    #[test]
    fn codes_are_normalized() {
        let f = FlowFilter {
            state: Some("6".to_string()),
            county: Some("6037".to_string()),
            ..Default::default()
        };
        let r = f.resolve(200);
        assert_eq!(r.state.as_deref(), Some("06"));
        assert_eq!(r.county.as_deref(), Some("06037"));
    }

    #[test]
    fn all_is_unfiltered() {
        let f = FlowFilter {
            age: Some("all".to_string()),
            income: Some("inc_lt_25k".to_string()),
            ..Default::default()
        };
        let r = f.resolve(200);
        assert_eq!(r.age, None);
        assert_eq!(r.income.as_deref(), Some("inc_lt_25k"));
    }

    #[test]
    fn equivalent_filters_share_a_signature() {
        let a = FlowFilter {
            state: Some("06".to_string()),
            metric: Some(Metric::In),
            ..Default::default()
        };
        let b = FlowFilter {
            metric: Some(Metric::In),
            state: Some("6".to_string()),
            ..Default::default()
        };
        assert_eq!(a.resolve(200).signature(), b.resolve(200).signature());
    }
}
