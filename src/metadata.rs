//! Dynamic metadata values attached to a point, and the filter engine's
//! typed view over them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A geographic coordinate, used by [`Value::Geo`] and geo-radius filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters (Haversine formula).
    #[must_use]
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_M * c
    }
}

/// A dynamically-typed metadata value. Distinct from [`serde_json::Value`]
/// so that timestamps and geo-points compare and filter natively instead of
/// round-tripping through strings on every predicate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Geo(GeoPoint),
    Map(BTreeMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Geo(g) => write!(f, "({}, {})", g.lat, g.lon),
            Self::Map(_) => write!(f, "<map>"),
        }
    }
}

impl Value {
    /// Numeric comparison key, if this value is orderable as a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            Self::Timestamp(t) => Some(*t as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a raw JSON value into the richest [`Value`] variant that
    /// fits, per the engine's string-coercion rule: a string that parses
    /// cleanly as an RFC 3339 timestamp or as `"lat,lon"` is stored as that
    /// richer type rather than as `Value::String`, so filters written
    /// against ingested JSON payloads can still use range and geo
    /// predicates without a separate schema declaration.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Self::from_str_coerced(s),
            JsonValue::Array(_) => Self::Null,
            JsonValue::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn from_str_coerced(s: &str) -> Self {
        if let Some(geo) = parse_lat_lon(s) {
            return Self::Geo(geo);
        }
        if let Some(ts) = parse_rfc3339_millis(s) {
            return Self::Timestamp(ts);
        }
        Self::String(s.to_string())
    }
}

fn parse_lat_lon(s: &str) -> Option<GeoPoint> {
    let (lat_str, lon_str) = s.split_once(',')?;
    let lat: f64 = lat_str.trim().parse().ok()?;
    let lon: f64 = lon_str.trim().parse().ok()?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some(GeoPoint::new(lat, lon))
    } else {
        None
    }
}

/// Minimal RFC 3339 `YYYY-MM-DDTHH:MM:SSZ` parser, no external date crate.
/// Returns milliseconds since the Unix epoch, ignoring leap seconds.
fn parse_rfc3339_millis(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    if bytes.len() < 20 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: i64 = s.get(5..7)?.parse().ok()?;
    let day: i64 = s.get(8..10)?.parse().ok()?;
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    let minute: i64 = s.get(14..16)?.parse().ok()?;
    let second: i64 = s.get(17..19)?.parse().ok()?;
    if !(1970..=9999).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let days = days_since_epoch(year, month, day);
    Some(((days * 86_400) + hour * 3_600 + minute * 60 + second) * 1_000)
}

fn days_since_epoch(year: i64, month: i64, day: i64) -> i64 {
    fn is_leap(y: i64) -> bool {
        (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
    }
    const CUMULATIVE: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let mut days = 0i64;
    for y in 1970..year {
        days += if is_leap(y) { 366 } else { 365 };
    }
    days += CUMULATIVE[(month - 1) as usize];
    if month > 2 && is_leap(year) {
        days += 1;
    }
    days + (day - 1)
}

/// Point metadata: an ordered map from field name to [`Value`], supporting
/// dot-notation traversal for nested maps.
pub type Metadata = BTreeMap<String, Value>;

/// Looks up `path` (dot-separated, e.g. `"user.address.city"`) in `meta`.
#[must_use]
pub fn get_field<'a>(meta: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = meta.get(first)?;
    for segment in segments {
        match current {
            Value::Map(m) => current = m.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod metadata_tests {
    use super::*;

    #[test]
    fn dot_path_traverses_nested_maps() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), Value::String("Berlin".to_string()));
        let mut address = BTreeMap::new();
        address.insert("address".to_string(), Value::Map(inner));
        let mut meta = BTreeMap::new();
        meta.insert("user".to_string(), Value::Map(address));

        assert_eq!(
            get_field(&meta, "user.address.city"),
            Some(&Value::String("Berlin".to_string()))
        );
        assert_eq!(get_field(&meta, "user.address.missing"), None);
        assert_eq!(get_field(&meta, "nonexistent"), None);
    }

    #[test]
    fn haversine_known_distance() {
        let berlin = GeoPoint::new(52.5200, 13.4050);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let d = berlin.distance_meters(&paris);
        assert!((d - 878_000.0).abs() < 10_000.0);
    }

    #[test]
    fn haversine_zero_for_identical_point() {
        let p = GeoPoint::new(10.0, 20.0);
        assert!(p.distance_meters(&p) < 1e-6);
    }

    #[test]
    fn json_number_coerces_to_int_or_float() {
        assert_eq!(Value::from_json(&serde_json::json!(5)), Value::Int(5));
        assert_eq!(Value::from_json(&serde_json::json!(5.5)), Value::Float(5.5));
    }

    #[test]
    fn json_string_coerces_to_geo_when_valid() {
        let v = Value::from_json(&serde_json::json!("52.52,13.405"));
        assert!(matches!(v, Value::Geo(_)));
    }

    #[test]
    fn json_string_coerces_to_timestamp_when_rfc3339() {
        let v = Value::from_json(&serde_json::json!("2024-01-15T10:30:00Z"));
        assert!(matches!(v, Value::Timestamp(_)));
    }

    #[test]
    fn plain_string_stays_a_string() {
        let v = Value::from_json(&serde_json::json!("hello world"));
        assert_eq!(v, Value::String("hello world".to_string()));
    }
}
