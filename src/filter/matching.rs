//! Predicate evaluation: the pure function `matches` walks a [`Filter`]
//! tree against a metadata map. Numeric comparisons coerce to `f64`;
//! string and bool compare by strict equality; timestamps compare as
//! integers.

use super::{geo_radius_meters, Filter};
use crate::metadata::{get_field, Metadata, Value};

pub(super) fn matches(filter: &Filter, metadata: &Metadata) -> bool {
    match filter {
        Filter::Equals(field, value) => {
            get_field(metadata, field).is_some_and(|actual| values_equal(actual, value))
        }
        Filter::NotEquals(field, value) => {
            get_field(metadata, field).is_some_and(|actual| !values_equal(actual, value))
        }
        Filter::Lt(field, value) => compare(metadata, field, value, |o| o.is_lt()),
        Filter::Le(field, value) => compare(metadata, field, value, |o| o.is_le()),
        Filter::Gt(field, value) => compare(metadata, field, value, |o| o.is_gt()),
        Filter::Ge(field, value) => compare(metadata, field, value, |o| o.is_ge()),
        Filter::Range { field, min, max } => range_matches(metadata, field, min.as_ref(), max.as_ref()),
        Filter::In(field, values) => {
            get_field(metadata, field).is_some_and(|actual| values.iter().any(|v| values_equal(actual, v)))
        }
        Filter::NotIn(field, values) => {
            get_field(metadata, field).is_some_and(|actual| values.iter().all(|v| !values_equal(actual, v)))
        }
        Filter::GeoRadius {
            field,
            center,
            radius,
            unit,
        } => match get_field(metadata, field) {
            Some(Value::Geo(point)) => point.distance_meters(center) <= geo_radius_meters(*unit, *radius),
            _ => false,
        },
        Filter::Exists(field) => get_field(metadata, field).is_some(),
        Filter::NotExists(field) => get_field(metadata, field).is_none(),
        Filter::And(children) => children.iter().all(|c| matches(c, metadata)),
        Filter::Or(children) => children.iter().any(|c| matches(c, metadata)),
        Filter::Not(child) => !matches(child, metadata),
    }
}

fn compare(
    metadata: &Metadata,
    field: &str,
    value: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let Some(actual) = get_field(metadata, field) else {
        return false;
    };
    compare_values(actual, value).is_some_and(accept)
}

fn range_matches(metadata: &Metadata, field: &str, min: Option<&Value>, max: Option<&Value>) -> bool {
    let Some(actual) = get_field(metadata, field) else {
        return false;
    };
    let above_min = match min {
        Some(m) => compare_values(actual, m).is_some_and(|o| o.is_ge()),
        None => true,
    };
    let below_max = match max {
        Some(m) => compare_values(actual, m).is_some_and(|o| o.is_le()),
        None => true,
    };
    above_min && below_max
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[cfg(test)]
mod matching_tests {
    use super::*;
    use crate::filter::DistanceUnit;
    use crate::metadata::GeoPoint;

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn numeric_coercion_across_int_and_float() {
        let m = meta(&[("price", Value::Int(10))]);
        assert!(matches(&Filter::Lt("price".to_string(), Value::Float(10.5)), &m));
        assert!(!matches(&Filter::Gt("price".to_string(), Value::Float(10.5)), &m));
    }

    #[test]
    fn range_is_inclusive_both_ends() {
        let m = meta(&[("x", Value::Int(5))]);
        let f = Filter::Range {
            field: "x".to_string(),
            min: Some(Value::Int(5)),
            max: Some(Value::Int(5)),
        };
        assert!(matches(&f, &m));
    }

    #[test]
    fn in_and_not_in_are_complementary_on_present_field() {
        let m = meta(&[("tag", Value::String("a".to_string()))]);
        let values = vec![Value::String("a".to_string()), Value::String("b".to_string())];
        assert!(matches(&Filter::In("tag".to_string(), values.clone()), &m));
        assert!(!matches(&Filter::NotIn("tag".to_string(), values), &m));
    }

    #[test]
    fn geo_radius_matches_within_distance() {
        let m = meta(&[("loc", Value::Geo(GeoPoint::new(52.5200, 13.4050)))]);
        let f = Filter::geo_radius("loc", GeoPoint::new(52.52, 13.4), 5.0, DistanceUnit::Kilometers).unwrap();
        assert!(matches(&f, &m));
        let far = Filter::geo_radius("loc", GeoPoint::new(0.0, 0.0), 5.0, DistanceUnit::Kilometers).unwrap();
        assert!(!matches(&far, &m));
    }

    #[test]
    fn string_equals_is_strict() {
        let m = meta(&[("name", Value::String("Foo".to_string()))]);
        assert!(!matches(&Filter::Equals("name".to_string(), Value::String("foo".to_string())), &m));
    }
}
