//! Per-position property constraints used by approximate count queries.
//!
//! Constraints are query-only; they are never stored with a pattern.

use serde::{Deserialize, Serialize};

/// Numeric range on one property: `lower < value <= upper`.
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericConstraint {
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl NumericConstraint {
    pub fn at_most(property: impl Into<String>, upper: f64) -> Self {
        Self {
            property: property.into(),
            lower: None,
            upper: Some(upper),
        }
    }

    pub fn greater_than(property: impl Into<String>, lower: f64) -> Self {
        Self {
            property: property.into(),
            lower: Some(lower),
            upper: None,
        }
    }

    pub fn between(property: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            property: property.into(),
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lo| value > lo) && self.upper.map_or(true, |hi| value <= hi)
    }
}

/// Categorical equality on one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalConstraint {
    pub property: String,
    pub value: String,
}

impl CategoricalConstraint {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Constraints on a single pattern position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConstraints {
    #[serde(default)]
    pub ep_numeric: Vec<NumericConstraint>,
    #[serde(default)]
    pub ep_categorical: Vec<CategoricalConstraint>,
    #[serde(default)]
    pub up_numeric: Vec<NumericConstraint>,
    #[serde(default)]
    pub up_categorical: Vec<CategoricalConstraint>,
}

impl EventConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_numeric(mut self, c: NumericConstraint) -> Self {
        self.ep_numeric.push(c);
        self
    }

    pub fn with_event_categorical(mut self, c: CategoricalConstraint) -> Self {
        self.ep_categorical.push(c);
        self
    }

    pub fn with_user_numeric(mut self, c: NumericConstraint) -> Self {
        self.up_numeric.push(c);
        self
    }

    pub fn with_user_categorical(mut self, c: CategoricalConstraint) -> Self {
        self.up_categorical.push(c);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ep_numeric.is_empty()
            && self.ep_categorical.is_empty()
            && self.up_numeric.is_empty()
            && self.up_categorical.is_empty()
    }
}

/// True when no position carries any constraint.
pub fn all_empty(constraints: &[EventConstraints]) -> bool {
    constraints.iter().all(EventConstraints::is_empty)
}
