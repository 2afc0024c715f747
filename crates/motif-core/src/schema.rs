//! Property schema shared by every pattern of a model.
//!
//! The schema records, per event name, which event property keys hold numeric
//! values and which hold categorical values (plus the categorical values that
//! were observed), and the same split for user properties. Every pattern built
//! against one schema bins its statistics over the same dimensions.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default cap on the number of distinct categorical values kept per key.
pub const DEFAULT_MAX_CATEGORICAL_VALUES: usize = 1000;

/// How a property key is binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Numeric,
    Categorical,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Numeric => write!(f, "numeric"),
            PropertyKind::Categorical => write!(f, "categorical"),
        }
    }
}

/// Numeric and categorical keys of one property family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertiesInfo {
    pub numeric: BTreeSet<String>,
    pub categorical: BTreeMap<String, BTreeSet<String>>,
}

impl PropertiesInfo {
    /// Classify a single observation. The first scalar seen for a key decides
    /// its kind; later observations of the other kind are ignored.
    pub fn observe(&mut self, key: &str, value: &Value, max_values: usize) {
        if !value.is_scalar() {
            return;
        }
        if value.is_numeric() {
            if !self.categorical.contains_key(key) {
                self.numeric.insert(key.to_string());
            }
            return;
        }
        if self.numeric.contains(key) {
            return;
        }
        let Some(repr) = value.categorical_repr() else {
            return;
        };
        let seen = self.categorical.entry(key.to_string()).or_default();
        if seen.len() < max_values || seen.contains(&repr) {
            seen.insert(repr);
        }
    }

    pub fn kind_of(&self, key: &str) -> Option<PropertyKind> {
        if self.numeric.contains(key) {
            Some(PropertyKind::Numeric)
        } else if self.categorical.contains_key(key) {
            Some(PropertyKind::Categorical)
        } else {
            None
        }
    }

    /// Numeric keys in sorted order.
    pub fn numeric_keys(&self) -> impl Iterator<Item = &str> {
        self.numeric.iter().map(String::as_str)
    }

    /// Categorical keys in sorted order.
    pub fn categorical_keys(&self) -> impl Iterator<Item = &str> {
        self.categorical.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.categorical.is_empty()
    }
}

/// Shared schema of one event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAndEventsInfo {
    pub user_properties: PropertiesInfo,
    pub event_properties: BTreeMap<String, PropertiesInfo>,
    #[serde(default = "default_max_values")]
    pub max_categorical_values: usize,
}

fn default_max_values() -> usize {
    DEFAULT_MAX_CATEGORICAL_VALUES
}

impl Default for UserAndEventsInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAndEventsInfo {
    pub fn new() -> Self {
        Self::with_max_categorical_values(DEFAULT_MAX_CATEGORICAL_VALUES)
    }

    pub fn with_max_categorical_values(max: usize) -> Self {
        Self {
            user_properties: PropertiesInfo::default(),
            event_properties: BTreeMap::new(),
            max_categorical_values: max,
        }
    }

    /// Register an event name even if it carries no properties.
    pub fn ensure_event(&mut self, event_name: &str) {
        if !self.event_properties.contains_key(event_name) {
            self.event_properties
                .insert(event_name.to_string(), PropertiesInfo::default());
        }
    }

    pub fn observe_event_property(&mut self, event_name: &str, key: &str, value: &Value) {
        let max = self.max_categorical_values;
        self.ensure_event(event_name);
        if let Some(info) = self.event_properties.get_mut(event_name) {
            info.observe(key, value, max);
        }
    }

    pub fn observe_user_property(&mut self, key: &str, value: &Value) {
        let max = self.max_categorical_values;
        self.user_properties.observe(key, value, max);
    }

    pub fn event_info(&self, event_name: &str) -> Option<&PropertiesInfo> {
        self.event_properties.get(event_name)
    }

    /// Known event names in sorted order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.event_properties.keys().map(String::as_str)
    }

    pub fn contains_event(&self, event_name: &str) -> bool {
        self.event_properties.contains_key(event_name)
    }
}
