//! Pattern entity: an ordered event-name sequence and its positional statistics.
//!
//! A pattern is built empty against a shared [`UserAndEventsInfo`], filled by
//! exactly one counting pass, then read-only. Every per-position statistic is
//! addressed as `"<position>.<propertyKey>"` with 1-based positions.

use crate::histogram::{CategoricalHistogram, HistogramLimits, NumericHistogram};
use motif_core::keys::{generic_dimensions, position_key, split_position_key};
use motif_core::{EventConstraints, Properties, PropertiesInfo, UserAndEventsInfo};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Inline storage for the event names of short patterns.
pub type EventNames = SmallVec<[String; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("A pattern needs at least one event name")]
    Empty,
}

/// Which count a query addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountType {
    #[default]
    PerUser,
    PerOccurrence,
}

impl fmt::Display for CountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountType::PerUser => write!(f, "per_user"),
            CountType::PerOccurrence => write!(f, "per_occurrence"),
        }
    }
}

impl std::str::FromStr for CountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_user" | "user" => Ok(CountType::PerUser),
            "per_occurrence" | "occurrence" => Ok(CountType::PerOccurrence),
            other => Err(format!("unknown count type: {}", other)),
        }
    }
}

/// Occurrence index and elapsed-since-join of one matched event unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mark {
    /// 1-based running count of this event name for the user.
    pub occurrence: u64,
    pub since_join: i64,
}

/// One aligned position of a completed match.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedEvent {
    pub mark: Mark,
    pub event_properties: Properties,
    pub user_properties: Properties,
}

/// Joint distributions of one pattern position, for one count scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStats {
    pub event_numeric: NumericHistogram,
    pub event_categorical: CategoricalHistogram,
    pub user_numeric: NumericHistogram,
    pub user_categorical: CategoricalHistogram,
}

impl PositionStats {
    fn new(
        position: usize,
        event_info: Option<&PropertiesInfo>,
        user_info: &PropertiesInfo,
        limits: HistogramLimits,
    ) -> Self {
        let keyed = |keys: Vec<&str>| -> Vec<String> {
            keys.into_iter().map(|k| position_key(position, k)).collect()
        };
        let (event_num, event_cat) = match event_info {
            Some(info) => (
                keyed(info.numeric_keys().collect()),
                keyed(info.categorical_keys().collect()),
            ),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            event_numeric: NumericHistogram::new(event_num, limits.max_numeric_bins),
            event_categorical: CategoricalHistogram::new(event_cat, limits.max_categorical_tuples),
            user_numeric: NumericHistogram::new(
                keyed(user_info.numeric_keys().collect()),
                limits.max_numeric_bins,
            ),
            user_categorical: CategoricalHistogram::new(
                keyed(user_info.categorical_keys().collect()),
                limits.max_categorical_tuples,
            ),
        }
    }

    fn clear(&mut self) {
        self.event_numeric.clear();
        self.event_categorical.clear();
        self.user_numeric.clear();
        self.user_categorical.clear();
    }

    fn record(&mut self, aligned: &AlignedEvent, weight: u64) {
        self.event_numeric
            .add_weighted(&numeric_row(&self.event_numeric, &aligned.event_properties), weight);
        self.event_categorical.add_weighted(
            categorical_row(&self.event_categorical, &aligned.event_properties),
            weight,
        );
        self.user_numeric
            .add_weighted(&numeric_row(&self.user_numeric, &aligned.user_properties), weight);
        self.user_categorical.add_weighted(
            categorical_row(&self.user_categorical, &aligned.user_properties),
            weight,
        );
    }
}

fn raw_key(dimension: &str) -> &str {
    split_position_key(dimension).map_or(dimension, |(_, key)| key)
}

fn numeric_row(hist: &NumericHistogram, props: &Properties) -> Vec<Option<f64>> {
    hist.dimensions()
        .iter()
        .map(|dim| {
            props
                .get(raw_key(dim))
                .filter(|v| v.is_numeric())
                .and_then(|v| v.as_float())
        })
        .collect()
}

fn categorical_row(hist: &CategoricalHistogram, props: &Properties) -> Vec<Option<String>> {
    hist.dimensions()
        .iter()
        .map(|dim| {
            props
                .get(raw_key(dim))
                .filter(|v| !v.is_numeric())
                .and_then(|v| v.categorical_repr())
        })
        .collect()
}

/// Counted event-name sequence with its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    event_names: EventNames,
    per_user_count: u64,
    total_user_count: u64,
    per_occurrence_count: u64,
    /// Whether the pass that filled this pattern ran the occurrence path.
    #[serde(default)]
    occurrences_counted: bool,
    /// First/last seen occurrence and since-join per position, plus `$joinTime`.
    generic_properties: NumericHistogram,
    per_user: Vec<PositionStats>,
    per_occurrence: Vec<PositionStats>,
}

impl Pattern {
    pub fn new<S: AsRef<str>>(
        event_names: &[S],
        schema: &UserAndEventsInfo,
        limits: HistogramLimits,
    ) -> Result<Self, PatternError> {
        if event_names.is_empty() {
            return Err(PatternError::Empty);
        }
        let names: EventNames = event_names.iter().map(|s| s.as_ref().to_string()).collect();
        let stats = |names: &EventNames| -> Vec<PositionStats> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    PositionStats::new(i + 1, schema.event_info(name), &schema.user_properties, limits)
                })
                .collect()
        };
        Ok(Self {
            generic_properties: NumericHistogram::new(
                generic_dimensions(names.len()),
                limits.max_numeric_bins,
            ),
            per_user: stats(&names),
            per_occurrence: stats(&names),
            event_names: names,
            per_user_count: 0,
            total_user_count: 0,
            per_occurrence_count: 0,
            occurrences_counted: false,
        })
    }

    pub fn event_names(&self) -> &[String] {
        &self.event_names
    }

    pub fn len(&self) -> usize {
        self.event_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_names.is_empty()
    }

    /// Comma-joined event names, used as the lookup key of a pattern.
    pub fn key(&self) -> String {
        self.event_names.join(",")
    }

    pub fn first_event(&self) -> &str {
        &self.event_names[0]
    }

    pub fn last_event(&self) -> &str {
        &self.event_names[self.event_names.len() - 1]
    }

    pub fn contains_event(&self, name: &str) -> bool {
        self.event_names.iter().any(|n| n == name)
    }

    pub fn per_user_count(&self) -> u64 {
        self.per_user_count
    }

    pub fn total_user_count(&self) -> u64 {
        self.total_user_count
    }

    pub fn per_occurrence_count(&self) -> u64 {
        self.per_occurrence_count
    }

    /// False when the per-occurrence fields were never filled, so a zero
    /// occurrence count means "unknown" rather than "none".
    pub fn occurrences_counted(&self) -> bool {
        self.occurrences_counted
    }

    pub fn count(&self, count_type: CountType) -> u64 {
        match count_type {
            CountType::PerUser => self.per_user_count,
            CountType::PerOccurrence => self.per_occurrence_count,
        }
    }

    pub fn generic_properties(&self) -> &NumericHistogram {
        &self.generic_properties
    }

    /// Mean of a generic statistic, e.g. `("1.$fSeenOccurrence")` or `$joinTime`.
    pub fn generic_mean(&self, key: &str) -> Option<f64> {
        self.generic_properties.mean_of(key)
    }

    pub fn position_stats(&self, count_type: CountType) -> &[PositionStats] {
        match count_type {
            CountType::PerUser => &self.per_user,
            CountType::PerOccurrence => &self.per_occurrence,
        }
    }

    /// Per-user count, estimated under `constraints` when given.
    pub fn per_user_count_matching(&self, constraints: Option<&[EventConstraints]>) -> Option<u64> {
        crate::estimate::estimate_count(self, CountType::PerUser, constraints)
    }

    pub fn per_occurrence_count_matching(
        &self,
        constraints: Option<&[EventConstraints]>,
    ) -> Option<u64> {
        crate::estimate::estimate_count(self, CountType::PerOccurrence, constraints)
    }

    pub(crate) fn reset(&mut self) {
        self.per_user_count = 0;
        self.total_user_count = 0;
        self.per_occurrence_count = 0;
        self.occurrences_counted = false;
        self.generic_properties.clear();
        self.per_user.iter_mut().for_each(PositionStats::clear);
        self.per_occurrence.iter_mut().for_each(PositionStats::clear);
    }

    pub(crate) fn set_total_user_count(&mut self, users: u64) {
        self.total_user_count = users;
    }

    pub(crate) fn set_occurrences_counted(&mut self, counted: bool) {
        self.occurrences_counted = counted;
    }

    /// Credit one user: `first` is the canonical alignment, `last` the latest
    /// compatible mark per position.
    pub(crate) fn record_user_match(&mut self, first: &[AlignedEvent], last: &[Mark], join_time: i64) {
        debug_assert_eq!(first.len(), self.len());
        debug_assert_eq!(last.len(), self.len());
        self.per_user_count += 1;

        let mut row = Vec::with_capacity(self.len() * 4 + 1);
        for (f, l) in first.iter().zip(last) {
            row.push(Some(f.mark.occurrence as f64));
            row.push(Some(l.occurrence as f64));
            row.push(Some(f.mark.since_join as f64));
            row.push(Some(l.since_join as f64));
        }
        row.push(Some(join_time as f64));
        self.generic_properties.add(&row);

        for (stats, aligned) in self.per_user.iter_mut().zip(first) {
            stats.record(aligned, 1);
        }
    }

    /// Credit `weight` non-overlapping occurrences sharing one alignment.
    pub(crate) fn record_occurrence(&mut self, aligned: &[AlignedEvent], weight: u64) {
        debug_assert_eq!(aligned.len(), self.len());
        self.per_occurrence_count += weight;
        for (stats, event) in self.per_occurrence.iter_mut().zip(aligned) {
            stats.record(event, weight);
        }
    }
}

#[cfg(test)]
impl Pattern {
    /// Set counts directly, leaving the distributions empty.
    pub(crate) fn with_counts(mut self, per_user: u64, total_users: u64, per_occurrence: u64) -> Self {
        self.per_user_count = per_user;
        self.total_user_count = total_users;
        self.per_occurrence_count = per_occurrence;
        self.occurrences_counted = true;
        self
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] users={}/{} occurrences={}",
            self.event_names.join(" -> "),
            self.per_user_count,
            self.total_user_count,
            self.per_occurrence_count
        )
    }
}

/// Builds empty patterns that all bin over one shared schema.
#[derive(Debug, Clone)]
pub struct PatternFactory {
    schema: Arc<UserAndEventsInfo>,
    limits: HistogramLimits,
}

impl PatternFactory {
    pub fn new(schema: Arc<UserAndEventsInfo>, limits: HistogramLimits) -> Self {
        Self { schema, limits }
    }

    pub fn schema(&self) -> &Arc<UserAndEventsInfo> {
        &self.schema
    }

    pub fn create<S: AsRef<str>>(&self, event_names: &[S]) -> Result<Pattern, PatternError> {
        Pattern::new(event_names, &self.schema, self.limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motif_core::Value;

    fn schema() -> UserAndEventsInfo {
        let mut s = UserAndEventsInfo::new();
        s.observe_event_property("pay", "amount", &Value::Float(1.0));
        s.observe_event_property("pay", "method", &Value::Str("card".into()));
        s.observe_user_property("country", &Value::Str("IN".into()));
        s.ensure_event("view");
        s
    }

    fn aligned(occurrence: u64, amount: f64) -> AlignedEvent {
        let mut epr = Properties::default();
        epr.insert("amount".into(), Value::Float(amount));
        epr.insert("method".into(), Value::Str("card".into()));
        let mut upr = Properties::default();
        upr.insert("country".into(), Value::Str("IN".into()));
        AlignedEvent {
            mark: Mark {
                occurrence,
                since_join: 10,
            },
            event_properties: epr,
            user_properties: upr,
        }
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let names: [&str; 0] = [];
        assert_eq!(
            Pattern::new(&names, &schema(), HistogramLimits::default()),
            Err(PatternError::Empty)
        );
    }

    #[test]
    fn test_dimensions_use_position_keys() {
        let p = Pattern::new(&["view", "pay"], &schema(), HistogramLimits::default()).unwrap();
        let stats = p.position_stats(CountType::PerUser);
        assert_eq!(stats.len(), 2);
        assert!(stats[0].event_numeric.dimensions().is_empty());
        assert_eq!(stats[1].event_numeric.dimensions(), &["2.amount".to_string()]);
        assert_eq!(stats[1].event_categorical.dimensions(), &["2.method".to_string()]);
        assert_eq!(stats[0].user_categorical.dimensions(), &["1.country".to_string()]);
        assert_eq!(p.generic_properties().dimensions().len(), 9);
    }

    #[test]
    fn test_record_and_reset() {
        let mut p = Pattern::new(&["pay"], &schema(), HistogramLimits::default()).unwrap();
        p.set_total_user_count(2);
        p.record_user_match(&[aligned(1, 5.0)], &[Mark { occurrence: 3, since_join: 40 }], 100);
        p.record_occurrence(&[aligned(1, 5.0)], 3);

        assert_eq!(p.per_user_count(), 1);
        assert_eq!(p.total_user_count(), 2);
        assert_eq!(p.per_occurrence_count(), 3);
        assert_eq!(p.generic_mean("1.$lSeenOccurrence"), Some(3.0));
        assert_eq!(p.generic_mean("$joinTime"), Some(100.0));
        assert_eq!(
            p.position_stats(CountType::PerUser)[0].event_numeric.mean(0),
            Some(5.0)
        );

        p.reset();
        assert_eq!(p.per_user_count(), 0);
        assert_eq!(p.total_user_count(), 0);
        assert!(p.generic_properties().is_empty());
    }

    #[test]
    fn test_pattern_serde() {
        let mut p = Pattern::new(&["view", "pay"], &schema(), HistogramLimits::default()).unwrap();
        p.set_total_user_count(1);
        let json = serde_json::to_string(&p).unwrap();
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.key(), "view,pay");
        assert_eq!(back.first_event(), "view");
        assert_eq!(back.last_event(), "pay");
    }

    #[test]
    fn test_count_type_parse() {
        assert_eq!("per_user".parse::<CountType>(), Ok(CountType::PerUser));
        assert_eq!("per-occurrence".parse::<CountType>(), Ok(CountType::PerOccurrence));
        assert!("weekly".parse::<CountType>().is_err());
    }
}
