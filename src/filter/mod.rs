//! Composable metadata filter engine.
//!
//! A [`Filter`] is a tree of predicates evaluated against a point's
//! [`Metadata`](crate::metadata::Metadata). Evaluation never fails: an
//! unknown field yields `false` (except under `NotExists`), and type
//! mismatches compare as unequal/unordered rather than erroring. Errors are
//! confined to *construction* (`Filter::range`, `Filter::geo_radius`) where
//! a malformed payload is rejected before it ever reaches evaluation.

mod matching;
mod payload;

pub use payload::FilterPayload;

use serde::{Deserialize, Serialize};

use crate::metadata::{GeoPoint, Value};

/// Unit for [`Filter::GeoRadius`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
}

impl DistanceUnit {
    fn to_meters(self, value: f64) -> f64 {
        match self {
            Self::Meters => value,
            Self::Kilometers => value * 1000.0,
        }
    }
}

/// A filter predicate tree, per the engine's §4.H predicate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Equals(String, Value),
    NotEquals(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    /// Inclusive on both ends. `min`/`max` of `None` means unbounded on
    /// that side.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    GeoRadius {
        field: String,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    },
    Exists(String),
    NotExists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// Negates exactly one child, per §6's "NOT requires exactly one
    /// sub-filter" wire contract.
    Not(Box<Filter>),
}

impl Filter {
    /// Builds a [`Filter::Range`], rejecting a payload where both bounds
    /// are absent or `min > max`.
    pub fn range(field: impl Into<String>, min: Option<Value>, max: Option<Value>) -> crate::Result<Self> {
        if min.is_none() && max.is_none() {
            return Err(crate::Error::InvalidInput(
                "range filter requires at least one bound".to_string(),
            ));
        }
        if let (Some(lo), Some(hi)) = (&min, &max) {
            if let (Some(lo), Some(hi)) = (lo.as_f64(), hi.as_f64()) {
                if lo > hi {
                    return Err(crate::Error::InvalidInput(
                        "range filter min must not exceed max".to_string(),
                    ));
                }
            }
        }
        Ok(Self::Range {
            field: field.into(),
            min,
            max,
        })
    }

    /// Builds a [`Filter::GeoRadius`], rejecting a non-positive radius or
    /// an out-of-range center coordinate.
    pub fn geo_radius(
        field: impl Into<String>,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> crate::Result<Self> {
        if radius <= 0.0 {
            return Err(crate::Error::InvalidInput(
                "geo radius must be positive".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&center.lat) || !(-180.0..=180.0).contains(&center.lon) {
            return Err(crate::Error::InvalidInput(
                "geo center out of range".to_string(),
            ));
        }
        Ok(Self::GeoRadius {
            field: field.into(),
            center,
            radius,
            unit,
        })
    }

    /// Evaluates this filter against `metadata`.
    #[must_use]
    pub fn matches(&self, metadata: &crate::metadata::Metadata) -> bool {
        matching::matches(self, metadata)
    }
}

pub(crate) fn geo_radius_meters(unit: DistanceUnit, radius: f64) -> f64 {
    unit.to_meters(radius)
}

#[cfg(test)]
mod filter_tests {
    use super::*;
    use crate::metadata::Metadata;

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn not_not_is_identity() {
        let f = Filter::Equals("category".to_string(), Value::String("db".to_string()));
        let double_not = Filter::Not(Box::new(Filter::Not(Box::new(f.clone()))));
        let m = meta(&[("category", Value::String("db".to_string()))]);
        assert_eq!(f.matches(&m), double_not.matches(&m));

        let m2 = meta(&[("category", Value::String("search".to_string()))]);
        assert_eq!(f.matches(&m2), double_not.matches(&m2));
    }

    #[test]
    fn empty_and_is_true() {
        let f = Filter::And(vec![]);
        assert!(f.matches(&Metadata::new()));
    }

    #[test]
    fn empty_or_is_false() {
        let f = Filter::Or(vec![]);
        assert!(!f.matches(&Metadata::new()));
    }

    #[test]
    fn missing_field_is_false_except_not_exists() {
        let m = Metadata::new();
        assert!(!Filter::Equals("x".to_string(), Value::Int(1)).matches(&m));
        assert!(!Filter::Exists("x".to_string()).matches(&m));
        assert!(Filter::NotExists("x".to_string()).matches(&m));
    }

    #[test]
    fn range_rejects_unbounded_and_inverted() {
        assert!(Filter::range("x", None, None).is_err());
        assert!(Filter::range("x", Some(Value::Int(5)), Some(Value::Int(1))).is_err());
        assert!(Filter::range("x", Some(Value::Int(1)), Some(Value::Int(5))).is_ok());
    }

    #[test]
    fn geo_radius_rejects_bad_inputs() {
        assert!(Filter::geo_radius("loc", GeoPoint::new(0.0, 0.0), -1.0, DistanceUnit::Meters).is_err());
        assert!(Filter::geo_radius("loc", GeoPoint::new(200.0, 0.0), 10.0, DistanceUnit::Meters).is_err());
        assert!(Filter::geo_radius("loc", GeoPoint::new(0.0, 0.0), 10.0, DistanceUnit::Meters).is_ok());
    }
}
