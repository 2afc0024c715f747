//! # Motif Core
//!
//! Foundational types shared by the Motif pattern engine and pattern server.
//!
//! ## Modules
//!
//! - [`value`]: Property values decoded from the event log
//! - [`schema`]: Numeric/categorical property schema per event name (`UserAndEventsInfo`)
//! - [`constraints`]: Per-position query constraints (`EventConstraints`)
//! - [`keys`]: `"<position>.<propertyKey>"` statistic key addressing
//!
//! ## Quick Start
//!
//! ```rust
//! use motif_core::{UserAndEventsInfo, Value};
//!
//! let mut schema = UserAndEventsInfo::new();
//! schema.observe_event_property("checkout", "amount", &Value::Float(19.0));
//! schema.observe_user_property("country", &Value::Str("IN".into()));
//! assert!(schema.contains_event("checkout"));
//! ```

pub mod constraints;
pub mod keys;
pub mod schema;
pub mod value;

pub use constraints::{CategoricalConstraint, EventConstraints, NumericConstraint};
pub use schema::{PropertiesInfo, PropertyKind, UserAndEventsInfo};
pub use value::{FxIndexMap, Properties, Value};
