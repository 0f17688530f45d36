//! Precomputed centroid table.
//!
//! An optional CSV of `geoid,lon,lat` rows. Missing or unreadable files are
//! treated as an empty table (the resolution chain just falls through to the
//! boundary data); rows with an unparseable coordinate are dropped.

use flowcache_model::codes;
use std::collections::BTreeMap;
use std::path::Path;

/// geoid → (lon, lat).
pub type CentroidTable = BTreeMap<String, (f64, f64)>;

/// Load the centroid table, tolerating absence.
pub fn load_centroid_table(path: &Path) -> CentroidTable {
    let mut table = CentroidTable::new();

    let mut reader = match csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path) {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "centroid table unavailable, falling back to boundary data"
            );
            return table;
        }
    };

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return table,
    };
    let col = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let (Some(geoid_col), Some(lon_col), Some(lat_col)) = (
        col(&["geoid", "id"]),
        col(&["lon", "longitude", "long"]),
        col(&["lat", "latitude"]),
    ) else {
        tracing::warn!(path = %path.display(), "centroid table missing geoid/lon/lat columns");
        return table;
    };

    for row in reader.records().flatten() {
        let Some(geoid) = row.get(geoid_col).and_then(|s| codes::normalize_county(s)) else {
            continue;
        };
        let lon = row.get(lon_col).and_then(|s| s.parse::<f64>().ok());
        let lat = row.get(lat_col).and_then(|s| s.parse::<f64>().ok());
        if let (Some(lon), Some(lat)) = (lon, lat) {
            if lon.is_finite() && lat.is_finite() {
                table.insert(geoid, (lon, lat));
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_normalizes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "GEOID,LON,LAT").unwrap();
        writeln!(f, "6037,-118.2,34.0").unwrap();
        writeln!(f, "36061,bad,40.7").unwrap();

        let table = load_centroid_table(f.path());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("06037"), Some(&(-118.2, 34.0)));
    }

    #[test]
    fn missing_file_is_empty() {
        let table = load_centroid_table(Path::new("/nonexistent/centroids.csv"));
        assert!(table.is_empty());
    }
}
