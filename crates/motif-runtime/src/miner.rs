//! Level-wise miner: schema pass, then one counting pass per pattern length.
//!
//! Level 1 counts every known event name with occurrence counting on, so the
//! model can report total event counts. Level 2 pairs frequent events in both
//! orders and adds `[A, A]` for events users repeat. Deeper levels grow
//! frequent patterns pairwise. Each level keeps patterns with at least
//! `min_support` users, capped at `max_patterns_per_level` by count.
//!
//! Levels past the first follow the configured `occurrence_counting` switch.
//! With it off their per-occurrence counts are reported as unknown.

use crate::candidates::{pairwise_growth, repetition_segmentation, single_event_candidates, CandidateError};
use crate::collector::{collect_schema, CollectStats};
use crate::counting::{CountingConfig, CountingEngine, CountingError};
use crate::event_log::{EventLog, EventLogError};
use crate::metrics::RuntimeMetrics;
use crate::pattern::{EventNames, Pattern, PatternError, PatternFactory};
use indexmap::IndexSet;
use motif_core::UserAndEventsInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    #[error("Schema pass failed: {0}")]
    Schema(#[from] EventLogError),

    #[error("Counting pass failed: {0}")]
    Counting(#[from] CountingError),

    #[error("Candidate generation failed: {0}")]
    Candidates(#[from] CandidateError),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Outcome of one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub length: usize,
    pub candidates: usize,
    pub kept: usize,
    pub elapsed_ms: u64,
}

/// Counted patterns of one log plus their shared schema.
#[derive(Debug, Clone)]
pub struct MinedModel {
    pub schema: Arc<UserAndEventsInfo>,
    pub patterns: Vec<Pattern>,
    pub collect: CollectStats,
    pub levels: Vec<LevelSummary>,
    pub total_users: u64,
}

impl MinedModel {
    /// Sum of per-occurrence counts over single-event patterns.
    pub fn total_event_count(&self) -> u64 {
        self.patterns
            .iter()
            .filter(|p| p.len() == 1)
            .map(|p| p.per_occurrence_count())
            .sum()
    }
}

pub struct Miner {
    config: CountingConfig,
    metrics: Option<RuntimeMetrics>,
}

impl Miner {
    pub fn new(config: CountingConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RuntimeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn engine(&self, config: CountingConfig) -> CountingEngine {
        let engine = CountingEngine::new(config);
        match &self.metrics {
            Some(m) => engine.with_metrics(m.clone()),
            None => engine,
        }
    }

    /// Keep the frequent patterns of a level, best first.
    fn prune(&self, mut patterns: Vec<Pattern>) -> Vec<Pattern> {
        patterns.retain(|p| p.per_user_count() >= self.config.min_support.max(1));
        patterns.sort_by(|a, b| {
            b.per_user_count()
                .cmp(&a.per_user_count())
                .then_with(|| a.event_names().cmp(b.event_names()))
        });
        patterns.truncate(self.config.max_patterns_per_level);
        patterns
    }

    pub fn run<L: EventLog + ?Sized>(&self, log: &L) -> Result<MinedModel, MinerError> {
        let mut schema = UserAndEventsInfo::new();
        let started = Instant::now();
        let collect = collect_schema(log, &mut schema)?;
        if let Some(m) = &self.metrics {
            m.record_pass("schema", collect.events as u64, collect.users as u64, started.elapsed());
        }
        let factory = PatternFactory::new(Arc::new(schema), self.config.histogram);
        let mut levels = Vec::new();
        let mut model: Vec<Pattern> = Vec::new();

        // Level 1
        let started = Instant::now();
        let mut singles = build(&factory, single_event_candidates(factory.schema()))?;
        let level_one = CountingConfig {
            occurrence_counting: true,
            ..self.config.clone()
        };
        let summary = self.engine(level_one).count(log, &mut singles)?;
        let total_users = summary.users;
        let frequent_singles = self.prune(singles.clone());
        levels.push(LevelSummary {
            length: 1,
            candidates: singles.len(),
            kept: frequent_singles.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        info!(length = 1, candidates = singles.len(), kept = frequent_singles.len(), "Level counted");

        let repeated: Vec<&str> = frequent_singles
            .iter()
            .filter(|p| p.per_occurrence_count() > p.per_user_count())
            .map(|p| p.first_event())
            .collect();
        let mut seeds: IndexSet<EventNames> = IndexSet::new();
        for a in &frequent_singles {
            for b in &frequent_singles {
                if a.first_event() != b.first_event() {
                    seeds.insert(EventNames::from_vec(vec![
                        a.first_event().to_string(),
                        b.first_event().to_string(),
                    ]));
                }
            }
        }
        if !frequent_singles.is_empty() {
            seeds.extend(repetition_segmentation(&frequent_singles, &repeated)?);
        }
        let mut candidates: Vec<EventNames> = seeds.into_iter().collect();
        model.extend(singles);

        let engine = self.engine(self.config.clone());
        for length in 2..=self.config.max_length {
            if candidates.is_empty() {
                break;
            }
            let started = Instant::now();
            let mut level = build(&factory, candidates)?;
            engine.count(log, &mut level)?;
            let considered = level.len();
            let frequent = self.prune(level);
            levels.push(LevelSummary {
                length,
                candidates: considered,
                kept: frequent.len(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
            info!(length, candidates = considered, kept = frequent.len(), "Level counted");

            let mut grown: IndexSet<EventNames> = IndexSet::new();
            for (i, a) in frequent.iter().enumerate() {
                for b in &frequent[i + 1..] {
                    grown.extend(pairwise_growth(a.event_names(), b.event_names()));
                }
            }
            candidates = grown.into_iter().collect();
            model.extend(frequent);
        }

        info!(
            patterns = model.len(),
            levels = levels.len(),
            users = total_users,
            "Mining finished"
        );
        Ok(MinedModel {
            schema: factory.schema().clone(),
            patterns: model,
            collect,
            levels,
            total_users,
        })
    }
}

fn build(factory: &PatternFactory, candidates: Vec<EventNames>) -> Result<Vec<Pattern>, PatternError> {
    candidates.iter().map(|names| factory.create(names.as_slice())).collect()
}
