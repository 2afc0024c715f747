//! # Motif Runtime
//!
//! Pattern statistics over per-user event logs.
//!
//! ## Modules
//!
//! - [`event`], [`event_log`]: Event records and the restartable NDJSON log scanner
//! - [`collector`]: Property schema collection (first pass)
//! - [`histogram`], [`pattern`]: Positional statistics of one event-name sequence
//! - [`counting`]: Counting Engine (exact, single pass)
//! - [`estimate`]: Constrained count estimation over the stored distributions
//! - [`candidates`]: Candidate growth rules
//! - [`service`]: `PatternServiceWrapper` query interface
//! - [`itree`]: Entropy-guided insight tree
//! - [`miner`]: Level-wise mining driver
//! - [`metrics`]: Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust
//! use motif_runtime::{count_patterns, CountingConfig, Event, InMemoryEventLog, Pattern};
//! use motif_runtime::histogram::HistogramLimits;
//! use motif_core::UserAndEventsInfo;
//!
//! let log = InMemoryEventLog::from_events(&[
//!     Event::new("u1", "signup", 1),
//!     Event::new("u1", "purchase", 9),
//!     Event::new("u2", "signup", 3),
//! ]);
//! let schema = UserAndEventsInfo::new();
//! let mut patterns = vec![Pattern::new(&["signup", "purchase"], &schema, HistogramLimits::default()).unwrap()];
//! count_patterns(&log, &mut patterns, &CountingConfig::default()).unwrap();
//! assert_eq!(patterns[0].per_user_count(), 1);
//! assert_eq!(patterns[0].total_user_count(), 2);
//! ```

pub mod candidates;
pub mod collector;
pub mod counting;
pub mod estimate;
pub mod event;
pub mod event_log;
pub mod histogram;
pub mod itree;
pub mod metrics;
pub mod miner;
pub mod pattern;
pub mod service;

pub use candidates::CandidateError;
pub use collector::{collect_schema, CollectStats};
pub use counting::{count_patterns, CountSummary, CountingConfig, CountingEngine, CountingError};
pub use estimate::{CountEstimator, IndependenceEstimator};
pub use event::Event;
pub use event_log::{EventLog, EventLogError, FileEventLog, InMemoryEventLog};
pub use itree::{build_itree, ITree, ITreeConfig, ITreeError, ITreeNode, ITreeRequest};
pub use metrics::RuntimeMetrics;
pub use miner::{LevelSummary, MinedModel, Miner, MinerError};
pub use pattern::{CountType, Pattern, PatternError, PatternFactory};
pub use service::{InMemoryPatternService, PatternServiceWrapper, ServiceError, ServiceResult};
