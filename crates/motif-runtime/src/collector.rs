//! Property schema collection: the first pass over the event log.
//!
//! Schema inference is best-effort. Malformed lines are logged and skipped,
//! unlike the counting pass where they are fatal.

use crate::event::Event;
use crate::event_log::{EventLog, EventLogError};
use motif_core::UserAndEventsInfo;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Summary of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectStats {
    /// Events successfully folded into the schema.
    pub events: usize,
    /// Lines rejected as malformed.
    pub skipped: usize,
    /// User boundaries observed (consecutive runs of one user id).
    pub users: usize,
    /// Smallest and largest event timestamp seen.
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

/// Fold one event's properties into the schema.
pub fn observe_event(schema: &mut UserAndEventsInfo, event: &Event) {
    schema.ensure_event(&event.event_name);
    for (key, value) in &event.event_properties {
        schema.observe_event_property(&event.event_name, key, value);
    }
    for (key, value) in &event.user_properties {
        schema.observe_user_property(key, value);
    }
}

/// Scan the whole log once, mutating `schema`.
///
/// Undecodable lines are skipped. Failing to open or read the log is an error.
pub fn collect_schema<L: EventLog + ?Sized>(
    log: &L,
    schema: &mut UserAndEventsInfo,
) -> Result<CollectStats, EventLogError> {
    let mut stats = CollectStats::default();
    let mut current_user: Option<String> = None;

    for item in log.scan()? {
        match item {
            Ok(event) => {
                if current_user.as_deref() != Some(event.user_id.as_str()) {
                    stats.users += 1;
                    current_user = Some(event.user_id.clone());
                }
                observe_event(schema, &event);
                stats.events += 1;
                let ts = event.timestamp;
                stats.first_timestamp = Some(stats.first_timestamp.map_or(ts, |t| t.min(ts)));
                stats.last_timestamp = Some(stats.last_timestamp.map_or(ts, |t| t.max(ts)));
            }
            Err(e @ EventLogError::Read { .. }) => return Err(e),
            Err(e) => {
                warn!("Skipping line during schema collection: {}", e);
                stats.skipped += 1;
            }
        }
    }

    info!(
        events = stats.events,
        skipped = stats.skipped,
        users = stats.users,
        event_names = schema.event_properties.len(),
        "Schema collection finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::InMemoryEventLog;
    use motif_core::PropertyKind;

    #[test]
    fn test_collect_classifies_properties() {
        let log = InMemoryEventLog::from_events(&[
            Event::new("u1", "view", 1)
                .with_event_property("page", "/home")
                .with_event_property("load_ms", 120i64)
                .with_user_property("country", "IN"),
            Event::new("u1", "pay", 5)
                .with_event_property("amount", 10.5)
                .with_user_property("age", 30i64),
            Event::new("u2", "view", 2).with_event_property("page", "/pricing"),
        ]);
        let mut schema = UserAndEventsInfo::new();
        let stats = collect_schema(&log, &mut schema).unwrap();

        assert_eq!(stats.events, 3);
        assert_eq!(stats.users, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!((stats.first_timestamp, stats.last_timestamp), (Some(1), Some(5)));

        let view = schema.event_info("view").unwrap();
        assert_eq!(view.kind_of("page"), Some(PropertyKind::Categorical));
        assert_eq!(view.kind_of("load_ms"), Some(PropertyKind::Numeric));
        assert_eq!(view.categorical["page"].len(), 2);
        assert_eq!(
            schema.user_properties.kind_of("age"),
            Some(PropertyKind::Numeric)
        );
    }

    #[test]
    fn test_collect_tolerates_malformed_lines() {
        let mut data = Event::new("u1", "A", 1).to_line();
        data.push_str("\n{broken\n");
        data.push_str(&Event::new("u1", "B", 2).to_line());
        let log = InMemoryEventLog::new(data);

        let mut schema = UserAndEventsInfo::new();
        let stats = collect_schema(&log, &mut schema).unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.skipped, 1);
        assert!(schema.contains_event("A"));
        assert!(schema.contains_event("B"));
    }

    #[test]
    fn test_collect_ignores_non_scalars() {
        let event = Event::new("u1", "A", 1).with_event_property(
            "tags",
            motif_core::Value::Array(vec![motif_core::Value::Int(1)]),
        );
        let log = InMemoryEventLog::from_events(&[event]);
        let mut schema = UserAndEventsInfo::new();
        collect_schema(&log, &mut schema).unwrap();
        assert!(schema.event_info("A").unwrap().is_empty());
    }

    /// Serves one good line, then fails like a dropped mount.
    struct TruncatedLog;

    struct Broken;

    impl std::io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "stale handle"))
        }
    }

    impl EventLog for TruncatedLog {
        fn scan(
            &self,
        ) -> Result<crate::event_log::EventLogReader<Box<dyn std::io::BufRead + '_>>, EventLogError>
        {
            use std::io::Read;
            let line = format!("{}\n", Event::new("u1", "A", 1).to_line());
            let source = std::io::Cursor::new(line.into_bytes()).chain(Broken);
            let reader: Box<dyn std::io::BufRead + '_> = Box::new(std::io::BufReader::new(source));
            Ok(crate::event_log::EventLogReader::new(reader))
        }
    }

    #[test]
    fn test_collect_fails_on_read_error() {
        let mut schema = UserAndEventsInfo::new();
        let result = collect_schema(&TruncatedLog, &mut schema);
        assert!(matches!(result, Err(EventLogError::Read { line: 2, .. })));
    }
}
