//! Resolved geographic entities.

use serde::{Deserialize, Serialize};

/// A resolved county. `lon`/`lat` are `None` when every coordinate source in
/// the resolution chain failed; consumers treat such counties as unplottable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoEntity {
    pub geoid: String,
    /// Two-digit parent state FIPS.
    pub state: String,
    pub state_name: String,
    pub name: String,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

/// A resolved state (or state-equivalent territory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    pub code: String,
    pub name: String,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

/// Full state name for a two-digit FIPS code.
pub fn state_name(fips: &str) -> Option<&'static str> {
    let name = match fips {
        "01" => "Alabama",
        "02" => "Alaska",
        "04" => "Arizona",
        "05" => "Arkansas",
        "06" => "California",
        "08" => "Colorado",
        "09" => "Connecticut",
        "10" => "Delaware",
        "11" => "District of Columbia",
        "12" => "Florida",
        "13" => "Georgia",
        "15" => "Hawaii",
        "16" => "Idaho",
        "17" => "Illinois",
        "18" => "Indiana",
        "19" => "Iowa",
        "20" => "Kansas",
        "21" => "Kentucky",
        "22" => "Louisiana",
        "23" => "Maine",
        "24" => "Maryland",
        "25" => "Massachusetts",
        "26" => "Michigan",
        "27" => "Minnesota",
        "28" => "Mississippi",
        "29" => "Missouri",
        "30" => "Montana",
        "31" => "Nebraska",
        "32" => "Nevada",
        "33" => "New Hampshire",
        "34" => "New Jersey",
        "35" => "New Mexico",
        "36" => "New York",
        "37" => "North Carolina",
        "38" => "North Dakota",
        "39" => "Ohio",
        "40" => "Oklahoma",
        "41" => "Oregon",
        "42" => "Pennsylvania",
        "44" => "Rhode Island",
        "45" => "South Carolina",
        "46" => "South Dakota",
        "47" => "Tennessee",
        "48" => "Texas",
        "49" => "Utah",
        "50" => "Vermont",
        "51" => "Virginia",
        "53" => "Washington",
        "54" => "West Virginia",
        "55" => "Wisconsin",
        "56" => "Wyoming",
        "60" => "American Samoa",
        "66" => "Guam",
        "69" => "Northern Mariana Islands",
        "72" => "Puerto Rico",
        "78" => "U.S. Virgin Islands",
        _ => return None,
    };
    Some(name)
}

/// Synthetic centroids for the non-US origin region codes in the dataset.
/// Approximate lon/lat, good enough to anchor an arc endpoint on a world map.
pub fn region_centroid(code: &str) -> Option<(f64, f64)> {
    let c = match code {
        "ASI" => (90.0, 30.0),
        "EUR" => (10.0, 50.0),
        "CAM" => (-90.0, 15.0),
        "AFR" => (20.0, 5.0),
        "SAM" => (-60.0, -15.0),
        "NAM" => (-100.0, 45.0),
        "CAR" => (-75.0, 20.0),
        "OCE" => (140.0, -25.0),
        "ISL" => (-30.0, 64.0),
        _ => return None,
    };
    Some(c)
}
