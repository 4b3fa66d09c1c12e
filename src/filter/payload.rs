//! Wire-shaped filter payload (§6 of the interface contract) and its
//! conversion into the evaluable [`Filter`] tree. Kept separate from
//! `Filter` itself because the wire shape is a flatter, string-keyed sum
//! type meant for transport serialization, while `Filter` is the tree the
//! engine actually walks.

use serde::{Deserialize, Serialize};

use super::{DistanceUnit, Filter};
use crate::metadata::{GeoPoint, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOp {
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeOp {
    And,
    Or,
    Not,
}

/// The over-the-wire filter payload described in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPayload {
    Comparison {
        field: String,
        op: ComparisonOp,
        value: Value,
    },
    Range {
        field: String,
        #[serde(default)]
        gt: Option<Value>,
        #[serde(default)]
        gte: Option<Value>,
        #[serde(default)]
        lt: Option<Value>,
        #[serde(default)]
        lte: Option<Value>,
    },
    List {
        field: String,
        op: ListOp,
        values: Vec<Value>,
    },
    GeoRadius {
        field: String,
        lat: f64,
        lon: f64,
        radius_km: f64,
    },
    Exists {
        field: String,
    },
    Composite {
        op: CompositeOp,
        sub_filters: Vec<FilterPayload>,
    },
}

impl FilterPayload {
    /// Converts this wire payload into an evaluable [`Filter`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed `Range` (both bounds on the
    /// same side, or neither bound set), a malformed geo payload, or a
    /// `Composite { op: Not, .. }` without exactly one sub-filter.
    pub fn into_filter(self) -> crate::Result<Filter> {
        Ok(match self {
            Self::Comparison { field, op, value } => match op {
                ComparisonOp::Eq => Filter::Equals(field, value),
                ComparisonOp::Ne => Filter::NotEquals(field, value),
                ComparisonOp::Gt => Filter::Gt(field, value),
                ComparisonOp::Lt => Filter::Lt(field, value),
                ComparisonOp::Gte => Filter::Ge(field, value),
                ComparisonOp::Lte => Filter::Le(field, value),
            },
            Self::Range { field, gt, gte, lt, lte } => {
                if gt.is_some() && gte.is_some() {
                    return Err(crate::Error::InvalidInput(
                        "range filter cannot set both gt and gte".to_string(),
                    ));
                }
                if lt.is_some() && lte.is_some() {
                    return Err(crate::Error::InvalidInput(
                        "range filter cannot set both lt and lte".to_string(),
                    ));
                }
                let min = gte.or(gt);
                let max = lte.or(lt);
                Filter::range(field, min, max)?
            }
            Self::List { field, op, values } => match op {
                ListOp::In => Filter::In(field, values),
                ListOp::NotIn => Filter::NotIn(field, values),
            },
            Self::GeoRadius {
                field,
                lat,
                lon,
                radius_km,
            } => Filter::geo_radius(field, GeoPoint::new(lat, lon), radius_km, DistanceUnit::Kilometers)?,
            Self::Exists { field } => Filter::Exists(field),
            Self::Composite { op, sub_filters } => {
                let children = sub_filters
                    .into_iter()
                    .map(FilterPayload::into_filter)
                    .collect::<crate::Result<Vec<_>>>()?;
                match op {
                    CompositeOp::And => Filter::And(children),
                    CompositeOp::Or => Filter::Or(children),
                    CompositeOp::Not => {
                        if children.len() != 1 {
                            return Err(crate::Error::InvalidInput(
                                "not filter requires exactly one sub-filter".to_string(),
                            ));
                        }
                        Filter::Not(Box::new(children.into_iter().next().unwrap()))
                    }
                }
            }
        })
    }
}
