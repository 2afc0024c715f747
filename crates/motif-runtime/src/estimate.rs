//! Approximate counts under per-position property constraints.
//!
//! Exact counts come from the counting pass. When constraints are supplied the
//! stored count is scaled by the probability that a credited match satisfies
//! them, read off the pattern's joint distributions.

use crate::histogram::{CategoricalHistogram, DimensionBound, NumericHistogram};
use crate::pattern::{CountType, Pattern, PositionStats};
use motif_core::constraints::all_empty;
use motif_core::keys::position_key;
use motif_core::{CategoricalConstraint, EventConstraints, NumericConstraint};
use std::fmt;

/// Estimation policy for constrained counts.
pub trait CountEstimator: Send + Sync + fmt::Debug {
    /// Probability that one credited match satisfies `constraints` at the
    /// given 1-based `position`.
    fn position_probability(
        &self,
        stats: &PositionStats,
        position: usize,
        constraints: &EventConstraints,
    ) -> f64;

    /// Stored count scaled by the joint probability over all positions.
    /// Returns `None` when more constraint entries than positions are given.
    fn estimate(
        &self,
        pattern: &Pattern,
        count_type: CountType,
        constraints: &[EventConstraints],
    ) -> Option<u64> {
        if constraints.len() > pattern.len() {
            return None;
        }
        let stored = pattern.count(count_type);
        if stored == 0 || all_empty(constraints) {
            return Some(stored);
        }
        let stats = pattern.position_stats(count_type);
        let mut probability = 1.0;
        for (idx, c) in constraints.iter().enumerate() {
            if c.is_empty() {
                continue;
            }
            probability *= self.position_probability(&stats[idx], idx + 1, c);
            if probability == 0.0 {
                break;
            }
        }
        Some((stored as f64 * probability).round() as u64)
    }

    /// Count of `pattern`, exact without constraints. Per-occurrence counts
    /// of a pattern counted without the occurrence path are unknown.
    fn count(
        &self,
        pattern: &Pattern,
        count_type: CountType,
        constraints: Option<&[EventConstraints]>,
    ) -> Option<u64> {
        if count_type == CountType::PerOccurrence && !pattern.occurrences_counted() {
            return None;
        }
        match constraints {
            None => Some(pattern.count(count_type)),
            Some(c) => self.estimate(pattern, count_type, c),
        }
    }
}

/// Treats positions and property families as independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependenceEstimator;

impl CountEstimator for IndependenceEstimator {
    fn position_probability(
        &self,
        stats: &PositionStats,
        position: usize,
        constraints: &EventConstraints,
    ) -> f64 {
        numeric_probability(&stats.event_numeric, position, &constraints.ep_numeric)
            * categorical_probability(&stats.event_categorical, position, &constraints.ep_categorical)
            * numeric_probability(&stats.user_numeric, position, &constraints.up_numeric)
            * categorical_probability(&stats.user_categorical, position, &constraints.up_categorical)
    }
}

fn numeric_probability(
    hist: &NumericHistogram,
    position: usize,
    constraints: &[NumericConstraint],
) -> f64 {
    if constraints.is_empty() {
        return 1.0;
    }
    let mut bounds = Vec::with_capacity(constraints.len());
    for c in constraints {
        let Some(dimension) = hist.dimension_index(&position_key(position, &c.property)) else {
            return 0.0;
        };
        bounds.push(DimensionBound {
            dimension,
            lower: c.lower,
            upper: c.upper,
        });
    }
    hist.cdf(&bounds)
}

fn categorical_probability(
    hist: &CategoricalHistogram,
    position: usize,
    constraints: &[CategoricalConstraint],
) -> f64 {
    if constraints.is_empty() {
        return 1.0;
    }
    let mut equalities = Vec::with_capacity(constraints.len());
    for c in constraints {
        let Some(dimension) = hist.dimension_index(&position_key(position, &c.property)) else {
            return 0.0;
        };
        equalities.push((dimension, c.value.as_str()));
    }
    hist.pdf(&equalities)
}

/// Count of `pattern` under optional constraints using [`IndependenceEstimator`].
pub fn estimate_count(
    pattern: &Pattern,
    count_type: CountType,
    constraints: Option<&[EventConstraints]>,
) -> Option<u64> {
    IndependenceEstimator.count(pattern, count_type, constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramLimits;
    use crate::pattern::{AlignedEvent, Mark};
    use motif_core::{Properties, UserAndEventsInfo, Value};

    fn schema() -> UserAndEventsInfo {
        let mut s = UserAndEventsInfo::new();
        s.observe_event_property("pay", "amount", &Value::Float(1.0));
        s.observe_user_property("plan", &Value::Str("pro".into()));
        s.ensure_event("view");
        s
    }

    fn pay(amount: f64, plan: &str) -> AlignedEvent {
        let mut epr = Properties::default();
        epr.insert("amount".into(), Value::Float(amount));
        let mut upr = Properties::default();
        upr.insert("plan".into(), Value::Str(plan.into()));
        AlignedEvent {
            mark: Mark::default(),
            event_properties: epr,
            user_properties: upr,
        }
    }

    fn view() -> AlignedEvent {
        AlignedEvent {
            mark: Mark::default(),
            event_properties: Properties::default(),
            user_properties: Properties::default(),
        }
    }

    fn counted() -> Pattern {
        let mut p = Pattern::new(&["view", "pay"], &schema(), HistogramLimits::default()).unwrap();
        let marks = [Mark::default(), Mark::default()];
        for (amount, plan) in [(5.0, "pro"), (50.0, "free"), (500.0, "pro"), (7.0, "free")] {
            p.record_user_match(&[view(), pay(amount, plan)], &marks, 0);
        }
        p.set_total_user_count(4);
        p
    }

    #[test]
    fn test_unconstrained_is_exact() {
        let p = counted();
        assert_eq!(estimate_count(&p, CountType::PerUser, None), Some(4));
        let empty = vec![EventConstraints::new(), EventConstraints::new()];
        assert_eq!(estimate_count(&p, CountType::PerUser, Some(&empty)), Some(4));
    }

    #[test]
    fn test_numeric_box() {
        let p = counted();
        let c = vec![
            EventConstraints::new(),
            EventConstraints::new().with_event_numeric(NumericConstraint::at_most("amount", 10.0)),
        ];
        assert_eq!(p.per_user_count_matching(Some(&c)), Some(2));

        let c = vec![
            EventConstraints::new(),
            EventConstraints::new()
                .with_event_numeric(NumericConstraint::between("amount", 5.0, 50.0)),
        ];
        // lower bound is exclusive
        assert_eq!(p.per_user_count_matching(Some(&c)), Some(2));
    }

    #[test]
    fn test_families_multiply() {
        let p = counted();
        let c = vec![
            EventConstraints::new(),
            EventConstraints::new()
                .with_event_numeric(NumericConstraint::at_most("amount", 10.0))
                .with_user_categorical(CategoricalConstraint::new("plan", "pro")),
        ];
        // 0.5 * 0.5 * 4
        assert_eq!(p.per_user_count_matching(Some(&c)), Some(1));
    }

    #[test]
    fn test_unknown_property_is_zero() {
        let p = counted();
        let c = vec![EventConstraints::new()
            .with_event_numeric(NumericConstraint::greater_than("amount", 0.0))];
        // "view" has no amount property
        assert_eq!(p.per_user_count_matching(Some(&c)), Some(0));

        let c = vec![
            EventConstraints::new(),
            EventConstraints::new().with_event_categorical(CategoricalConstraint::new("currency", "EUR")),
        ];
        assert_eq!(p.per_user_count_matching(Some(&c)), Some(0));
    }

    #[test]
    fn test_too_many_constraints() {
        let p = counted();
        let c = vec![EventConstraints::new(); 3];
        assert_eq!(p.per_user_count_matching(Some(&c)), None);
    }

    #[test]
    fn test_zero_count_stays_zero() {
        let p = Pattern::new(&["pay"], &schema(), HistogramLimits::default()).unwrap();
        let c = vec![EventConstraints::new().with_event_numeric(NumericConstraint::at_most("amount", 1.0))];
        assert_eq!(p.per_occurrence_count_matching(Some(&c)), Some(0));
    }
}
