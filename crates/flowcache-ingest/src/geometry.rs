//! Geo metadata resolution from GeoJSON boundary files.
//!
//! Boundary files arrive as untyped GeoJSON; this module walks the feature
//! collection with `serde_json::Value` and never mutates the input. Each
//! county resolves its representative coordinate through a deterministic
//! fallback chain:
//!
//! 1. exact match in the precomputed centroid table,
//! 2. the `INTPTLON`/`INTPTLAT` attribute pair on the feature,
//! 3. a computed vertex centroid of the `Polygon`/`MultiPolygon` geometry.
//!
//! Any other geometry type, or a degenerate one, leaves the coordinate
//! `None` rather than failing the feature.

use crate::centroids::CentroidTable;
use flowcache_model::codes;
use flowcache_model::geo::{state_name, GeoEntity, StateMeta};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolve one `GeoEntity` per county feature. Duplicate geoids keep the
/// first occurrence (at most one entity per geoid).
pub fn resolve_counties(boundaries: &Value, centroids: &CentroidTable) -> Vec<GeoEntity> {
    let mut by_geoid: BTreeMap<String, GeoEntity> = BTreeMap::new();

    for feature in features(boundaries) {
        let props = &feature["properties"];
        let Some(geoid) = prop_str(props, &["GEOID", "geoid"]).and_then(|s| codes::normalize_county(s))
        else {
            tracing::warn!("county feature without a GEOID property, skipping");
            continue;
        };
        if by_geoid.contains_key(&geoid) {
            continue;
        }
        // GEOID comes from an untrusted file; only the 2+3 digit shape
        // carries a usable state prefix
        let Some((geoid_state, _)) = codes::split_geoid(&geoid) else {
            tracing::warn!(geoid = %geoid, "county feature with a malformed GEOID, skipping");
            continue;
        };

        let state = prop_str(props, &["STATEFP", "statefp"])
            .and_then(codes::normalize_state)
            .unwrap_or_else(|| geoid_state.to_string());
        let name = prop_str(props, &["NAME", "name"])
            .map(str::to_string)
            .unwrap_or_else(|| geoid.clone());

        let (lon, lat) = resolve_coordinate(&geoid, props, feature, centroids);

        let state_name = state_name(&state)
            .map(str::to_string)
            .unwrap_or_else(|| state.clone());
        by_geoid.insert(
            geoid.clone(),
            GeoEntity {
                geoid,
                state,
                state_name,
                name,
                lon,
                lat,
            },
        );
    }

    by_geoid.into_values().collect()
}

/// Resolve one `StateMeta` per state feature; coordinates come straight from
/// the computed geometry centroid (state files carry no centroid table).
pub fn resolve_states(boundaries: &Value) -> Vec<StateMeta> {
    let mut by_code: BTreeMap<String, StateMeta> = BTreeMap::new();

    for feature in features(boundaries) {
        let props = &feature["properties"];
        let Some(code) =
            prop_str(props, &["STATEFP", "statefp", "STATE", "state"]).and_then(codes::normalize_state)
        else {
            tracing::warn!("state feature without a FIPS property, skipping");
            continue;
        };
        if by_code.contains_key(&code) {
            continue;
        }

        let name = prop_str(props, &["NAME", "name"])
            .map(str::to_string)
            .unwrap_or_else(|| code.clone());
        let centroid = geometry_centroid(&feature["geometry"]);

        by_code.insert(
            code.clone(),
            StateMeta {
                code,
                name,
                lon: centroid.map(|c| c.0),
                lat: centroid.map(|c| c.1),
            },
        );
    }

    by_code.into_values().collect()
}

fn resolve_coordinate(
    geoid: &str,
    props: &Value,
    feature: &Value,
    centroids: &CentroidTable,
) -> (Option<f64>, Option<f64>) {
    if let Some(&(lon, lat)) = centroids.get(geoid) {
        return (Some(lon), Some(lat));
    }

    let attr_lon = prop_num(props, &["INTPTLON", "intptlon"]);
    let attr_lat = prop_num(props, &["INTPTLAT", "intptlat"]);
    if let (Some(lon), Some(lat)) = (attr_lon, attr_lat) {
        return (Some(lon), Some(lat));
    }

    match geometry_centroid(&feature["geometry"]) {
        Some((lon, lat)) => (Some(lon), Some(lat)),
        None => (None, None),
    }
}

fn features(boundaries: &Value) -> impl Iterator<Item = &Value> {
    boundaries["features"]
        .as_array()
        .map(|a| a.iter())
        .unwrap_or_default()
}

/// Vertex centroid of a `Polygon` or `MultiPolygon`: the arithmetic mean of
/// every position in every ring. Other geometry types yield `None`.
fn geometry_centroid(geometry: &Value) -> Option<(f64, f64)> {
    let rings: Vec<&Value> = match geometry["type"].as_str()? {
        "Polygon" => geometry["coordinates"].as_array()?.iter().collect(),
        "MultiPolygon" => geometry["coordinates"]
            .as_array()?
            .iter()
            .filter_map(|poly| poly.as_array())
            .flatten()
            .collect(),
        _ => return None,
    };

    let mut sum_lon = 0.0;
    let mut sum_lat = 0.0;
    let mut count = 0u64;
    for ring in rings {
        for position in ring.as_array()? {
            let pair = position.as_array()?;
            let lon = pair.first()?.as_f64()?;
            let lat = pair.get(1)?.as_f64()?;
            sum_lon += lon;
            sum_lat += lat;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    Some((sum_lon / count as f64, sum_lat / count as f64))
}

fn prop_str<'a>(props: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|n| props.get(*n))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Numeric property that may be encoded as a number or a string (boundary
/// exports do both).
fn prop_num(props: &Value, names: &[&str]) -> Option<f64> {
    let v = names.iter().find_map(|n| props.get(*n))?;
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
