//! Counting Engine: one forward pass over a user-sorted log that credits
//! every candidate pattern with its per-user and per-occurrence matches.
//!
//! Per user and pattern the engine keeps:
//! - a greedy leftmost matcher giving the canonical ("first seen") alignment,
//!   whose properties feed the per-position distributions;
//! - for every position `j`, the latest chain of marks matching the prefix
//!   `0..=j`; at the user boundary the chain of the last position is the
//!   latest alignment compatible with a complete match ("last seen");
//! - optionally a restarting greedy matcher for non-overlapping occurrences.
//!
//! Nothing outlives the user boundary. Lines are dispatched through an
//! event-name index so each line only touches patterns containing its name.

use crate::event::Event;
use crate::event_log::{EventLog, EventLogError};
use crate::histogram::HistogramLimits;
use crate::metrics::RuntimeMetrics;
use crate::pattern::{AlignedEvent, Mark, Pattern};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The only counting algorithm revision this engine implements.
pub const SUPPORTED_ALGORITHM_VERSION: u32 = 2;

/// Counting pass configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingConfig {
    pub algorithm_version: u32,
    /// Also maintain per-occurrence counts and distributions.
    pub occurrence_counting: bool,
    pub histogram: HistogramLimits,
    /// Minimum per-user count a pattern needs to seed the next mining level.
    pub min_support: u64,
    /// Upper bound on patterns kept per mining level.
    pub max_patterns_per_level: usize,
    /// Longest pattern the miner grows.
    pub max_length: usize,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            algorithm_version: SUPPORTED_ALGORITHM_VERSION,
            occurrence_counting: false,
            histogram: HistogramLimits::default(),
            min_support: 1,
            max_patterns_per_level: 1000,
            max_length: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CountingError {
    #[error("Unsupported counting algorithm version {0}, only version 2 is supported")]
    UnsupportedAlgorithm(u32),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error("Unsorted log at line {line}: user {user_id} timestamp {timestamp} precedes {previous}")]
    Unsorted {
        line: usize,
        user_id: String,
        previous: i64,
        timestamp: i64,
    },
}

/// Totals of one counting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSummary {
    pub events: u64,
    pub users: u64,
    pub patterns: usize,
    pub user_matches: u64,
    pub occurrence_matches: u64,
    pub elapsed_ms: u64,
}

/// Per-user, per-pattern matching state.
struct Matcher {
    names: Vec<Arc<str>>,
    /// Every position carries the same event name.
    uniform: bool,
    first: Vec<AlignedEvent>,
    latest: Vec<Option<Vec<Mark>>>,
    occurrence: Vec<AlignedEvent>,
    touched: bool,
}

fn aligned(event: &Event, occurrence: u64) -> AlignedEvent {
    AlignedEvent {
        mark: Mark {
            occurrence,
            since_join: event.since_join(),
        },
        event_properties: event.event_properties.clone(),
        user_properties: event.user_properties.clone(),
    }
}

impl Matcher {
    fn new(pattern: &Pattern) -> Self {
        let names: Vec<Arc<str>> = pattern.event_names().iter().map(|n| Arc::from(n.as_str())).collect();
        let uniform = names.iter().all(|n| *n == names[0]);
        let len = names.len();
        Self {
            names,
            uniform,
            first: Vec::with_capacity(len),
            latest: vec![None; len],
            occurrence: Vec::with_capacity(len),
            touched: false,
        }
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    /// Advance on one line. `base` is the user's count of this event name
    /// before the line; the line's units are `base + 1 ..= base + cardinality`.
    /// Returns the number of occurrences credited.
    fn observe(&mut self, event: &Event, base: u64, occurrences: bool, pattern: &mut Pattern) -> u64 {
        let name: &str = &event.event_name;
        let units = event.cardinality;
        self.advance_first(event, name, base, units);
        self.advance_latest(event, name, base, units);
        if occurrences {
            self.advance_occurrence(event, name, base, units, pattern)
        } else {
            0
        }
    }

    fn advance_first(&mut self, event: &Event, name: &str, base: u64, units: u64) {
        let mut unit = 0;
        while unit < units && self.first.len() < self.len() && &*self.names[self.first.len()] == name {
            self.first.push(aligned(event, base + unit + 1));
            unit += 1;
        }
    }

    fn advance_latest(&mut self, event: &Event, name: &str, base: u64, units: u64) {
        let since_join = event.since_join();
        // Descending so that a position never chains onto this same line's
        // update of the position before it, except through explicit units.
        for j in (0..self.len()).rev() {
            if &*self.names[j] != name {
                continue;
            }
            let run = (0..=j)
                .rev()
                .take_while(|&k| &*self.names[k] == name)
                .count() as u64;
            let max_units = run.min(units);
            for used in (1..=max_units).rev() {
                let start = j + 1 - used as usize;
                let prefix = if start == 0 {
                    Some(Vec::with_capacity(j + 1))
                } else {
                    self.latest[start - 1].clone()
                };
                if let Some(mut chain) = prefix {
                    for k in 0..used {
                        chain.push(Mark {
                            occurrence: base + units - (used - 1 - k),
                            since_join,
                        });
                    }
                    self.latest[j] = Some(chain);
                    break;
                }
            }
        }
    }

    fn advance_occurrence(
        &mut self,
        event: &Event,
        name: &str,
        base: u64,
        units: u64,
        pattern: &mut Pattern,
    ) -> u64 {
        let len = self.len() as u64;
        let mut credited = 0;
        let mut unit = 0;
        while unit < units {
            let next = self.occurrence.len();
            if &*self.names[next] != name {
                break;
            }
            if next == 0 && self.uniform {
                let full = (units - unit) / len;
                if full > 0 {
                    let block: Vec<AlignedEvent> =
                        (0..len).map(|k| aligned(event, base + unit + k + 1)).collect();
                    pattern.record_occurrence(&block, full);
                    credited += full;
                    unit += full * len;
                    continue;
                }
            }
            self.occurrence.push(aligned(event, base + unit + 1));
            unit += 1;
            if self.occurrence.len() == self.len() {
                pattern.record_occurrence(&self.occurrence, 1);
                self.occurrence.clear();
                credited += 1;
            }
        }
        credited
    }

    /// Close the user: credit a per-user match if the canonical alignment completed.
    fn finish_user(&mut self, join_time: i64, pattern: &mut Pattern) -> bool {
        let matched = self.first.len() == self.len();
        if matched {
            let tail = self.len() - 1;
            let last = match self.latest[tail].take() {
                Some(chain) => chain,
                None => self.first.iter().map(|a| a.mark).collect(),
            };
            pattern.record_user_match(&self.first, &last, join_time);
        }
        self.first.clear();
        self.latest.iter_mut().for_each(|l| *l = None);
        self.occurrence.clear();
        self.touched = false;
        matched
    }
}

struct UserState {
    user_id: String,
    join_time: i64,
    last_timestamp: i64,
}

/// Counts candidate patterns over an event log.
#[derive(Clone, Default)]
pub struct CountingEngine {
    config: CountingConfig,
    metrics: Option<RuntimeMetrics>,
}

impl CountingEngine {
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

    pub fn config(&self) -> &CountingConfig {
        &self.config
    }

    /// Reset every pattern and count them in one pass over `log`.
    ///
    /// On error the patterns hold partial counts and must be recounted.
    pub fn count<L: EventLog + ?Sized>(
        &self,
        log: &L,
        patterns: &mut [Pattern],
    ) -> Result<CountSummary, CountingError> {
        if self.config.algorithm_version != SUPPORTED_ALGORITHM_VERSION {
            return Err(CountingError::UnsupportedAlgorithm(self.config.algorithm_version));
        }
        let started = Instant::now();
        info!(
            patterns = patterns.len(),
            occurrence_counting = self.config.occurrence_counting,
            "Counting pass started"
        );

        for pattern in patterns.iter_mut() {
            pattern.reset();
        }
        let mut index: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (pid, pattern) in patterns.iter().enumerate() {
            for name in pattern.event_names() {
                let ids = index.entry(name.clone()).or_default();
                if ids.last() != Some(&pid) {
                    ids.push(pid);
                }
            }
        }
        let mut matchers: Vec<Matcher> = patterns.iter().map(Matcher::new).collect();
        let mut touched: Vec<usize> = Vec::new();
        let mut seen: FxHashMap<Arc<str>, u64> = FxHashMap::default();
        let mut summary = CountSummary {
            patterns: patterns.len(),
            ..CountSummary::default()
        };
        let mut current: Option<UserState> = None;

        let mut reader = log.scan()?;
        while let Some(item) = reader.next() {
            let event = item?;
            match current.as_mut() {
                Some(user) if user.user_id == event.user_id => {
                    if event.timestamp < user.last_timestamp {
                        return Err(CountingError::Unsorted {
                            line: reader.line_number(),
                            user_id: event.user_id,
                            previous: user.last_timestamp,
                            timestamp: event.timestamp,
                        });
                    }
                    user.last_timestamp = event.timestamp;
                }
                _ => {
                    if let Some(user) = current.take() {
                        close_user(&user, &mut touched, &mut matchers, patterns, &mut summary);
                    }
                    current = Some(UserState {
                        user_id: event.user_id.clone(),
                        join_time: event.user_join_time,
                        last_timestamp: event.timestamp,
                    });
                    summary.users += 1;
                    seen.clear();
                }
            }
            summary.events += 1;

            let counter = seen.entry(event.event_name.clone()).or_insert(0);
            let base = *counter;
            *counter += event.cardinality;

            if let Some(ids) = index.get(&*event.event_name) {
                for &pid in ids {
                    let matcher = &mut matchers[pid];
                    if !matcher.touched {
                        matcher.touched = true;
                        touched.push(pid);
                    }
                    summary.occurrence_matches += matcher.observe(
                        &event,
                        base,
                        self.config.occurrence_counting,
                        &mut patterns[pid],
                    );
                }
            }
        }
        if let Some(user) = current.take() {
            close_user(&user, &mut touched, &mut matchers, patterns, &mut summary);
        }
        for pattern in patterns.iter_mut() {
            pattern.set_total_user_count(summary.users);
            pattern.set_occurrences_counted(self.config.occurrence_counting);
        }

        let elapsed = started.elapsed();
        summary.elapsed_ms = elapsed.as_millis() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_pass("count", summary.events, summary.users, elapsed);
            metrics.user_matches.inc_by(summary.user_matches);
            metrics.occurrence_matches.inc_by(summary.occurrence_matches);
        }
        info!(
            events = summary.events,
            users = summary.users,
            user_matches = summary.user_matches,
            occurrence_matches = summary.occurrence_matches,
            elapsed_ms = summary.elapsed_ms,
            "Counting pass finished"
        );
        Ok(summary)
    }
}

fn close_user(
    user: &UserState,
    touched: &mut Vec<usize>,
    matchers: &mut [Matcher],
    patterns: &mut [Pattern],
    summary: &mut CountSummary,
) {
    let mut matched = 0;
    for pid in touched.drain(..) {
        if matchers[pid].finish_user(user.join_time, &mut patterns[pid]) {
            matched += 1;
        }
    }
    summary.user_matches += matched;
    debug!(user = %user.user_id, matched, "User closed");
}

/// Count `patterns` over `log` with `config`.
pub fn count_patterns<L: EventLog + ?Sized>(
    log: &L,
    patterns: &mut [Pattern],
    config: &CountingConfig,
) -> Result<CountSummary, CountingError> {
    CountingEngine::new(config.clone()).count(log, patterns)
}
