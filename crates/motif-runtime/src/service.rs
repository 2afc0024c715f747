//! Read-only query interface over one counted model.
//!
//! [`PatternServiceWrapper`] is what the iTree builder and external callers
//! query. [`InMemoryPatternService`] serves a model held locally; the cluster
//! crate implements the same trait over sharded replicas.

use crate::estimate::{CountEstimator, IndependenceEstimator};
use crate::pattern::{CountType, Pattern};
use motif_core::{EventConstraints, FxIndexMap, UserAndEventsInfo};
use std::sync::Arc;

/// Lookup failure distinct from "not found".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Pattern service unavailable: {0}")]
    Unavailable(String),

    #[error("Request {0} exceeded its deadline")]
    DeadlineExceeded(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Query surface of a counted model. `Ok(None)` means "not found".
pub trait PatternServiceWrapper: Send + Sync {
    fn get_user_and_events_info(&self) -> ServiceResult<Arc<UserAndEventsInfo>>;

    fn get_pattern(&self, request_id: &str, event_names: &[String]) -> ServiceResult<Option<Arc<Pattern>>>;

    /// Patterns opening with `start` and closing with `end`; an empty filter
    /// matches anything.
    fn get_all_patterns(&self, request_id: &str, start: &str, end: &str) -> ServiceResult<Vec<Arc<Pattern>>>;

    fn get_all_containing_patterns(&self, request_id: &str, event: &str) -> ServiceResult<Vec<Arc<Pattern>>>;

    /// Policy used for constrained counts.
    fn estimator(&self) -> &dyn CountEstimator {
        &IndependenceEstimator
    }

    /// Sum of per-occurrence counts over single-event patterns.
    fn get_total_event_count(&self, request_id: &str) -> ServiceResult<u64> {
        Ok(self
            .get_all_patterns(request_id, "", "")?
            .iter()
            .filter(|p| p.len() == 1)
            .map(|p| p.per_occurrence_count())
            .sum())
    }

    fn get_per_user_count(
        &self,
        request_id: &str,
        event_names: &[String],
        constraints: Option<&[EventConstraints]>,
    ) -> ServiceResult<Option<u64>> {
        self.get_count(request_id, event_names, constraints, CountType::PerUser)
    }

    fn get_per_occurrence_count(
        &self,
        request_id: &str,
        event_names: &[String],
        constraints: Option<&[EventConstraints]>,
    ) -> ServiceResult<Option<u64>> {
        self.get_count(request_id, event_names, constraints, CountType::PerOccurrence)
    }

    fn get_count(
        &self,
        request_id: &str,
        event_names: &[String],
        constraints: Option<&[EventConstraints]>,
        count_type: CountType,
    ) -> ServiceResult<Option<u64>> {
        Ok(self
            .get_pattern(request_id, event_names)?
            .and_then(|p| self.estimator().count(&p, count_type, constraints)))
    }
}

/// Pattern service over a model held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryPatternService {
    schema: Arc<UserAndEventsInfo>,
    patterns: FxIndexMap<Vec<String>, Arc<Pattern>>,
    total_event_count: u64,
    estimator: Arc<dyn CountEstimator>,
}

impl InMemoryPatternService {
    pub fn new(schema: Arc<UserAndEventsInfo>, patterns: impl IntoIterator<Item = Pattern>) -> Self {
        let mut map = FxIndexMap::default();
        for pattern in patterns {
            map.insert(pattern.event_names().to_vec(), Arc::new(pattern));
        }
        let total_event_count = map
            .values()
            .filter(|p| p.len() == 1)
            .map(|p| p.per_occurrence_count())
            .sum();
        Self {
            schema,
            patterns: map,
            total_event_count,
            estimator: Arc::new(IndependenceEstimator),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn CountEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Arc<Pattern>> {
        self.patterns.values()
    }
}

impl PatternServiceWrapper for InMemoryPatternService {
    fn get_user_and_events_info(&self) -> ServiceResult<Arc<UserAndEventsInfo>> {
        Ok(self.schema.clone())
    }

    fn estimator(&self) -> &dyn CountEstimator {
        self.estimator.as_ref()
    }

    fn get_pattern(&self, _request_id: &str, event_names: &[String]) -> ServiceResult<Option<Arc<Pattern>>> {
        Ok(self.patterns.get(event_names).cloned())
    }

    fn get_all_patterns(&self, _request_id: &str, start: &str, end: &str) -> ServiceResult<Vec<Arc<Pattern>>> {
        Ok(self
            .patterns
            .values()
            .filter(|p| matches_filters(p, start, end))
            .cloned()
            .collect())
    }

    fn get_all_containing_patterns(&self, _request_id: &str, event: &str) -> ServiceResult<Vec<Arc<Pattern>>> {
        Ok(self
            .patterns
            .values()
            .filter(|p| p.contains_event(event))
            .cloned()
            .collect())
    }

    fn get_total_event_count(&self, _request_id: &str) -> ServiceResult<u64> {
        Ok(self.total_event_count)
    }
}

/// Start/end filter shared by every service implementation.
pub fn matches_filters(pattern: &Pattern, start: &str, end: &str) -> bool {
    (start.is_empty() || pattern.first_event() == start) && (end.is_empty() || pattern.last_event() == end)
}
