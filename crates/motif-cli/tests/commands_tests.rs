//! End-to-end tests for the CLI command layer.
//!
//! Covers: schema collection from a file, exact counting with occurrence
//! counts, mining into a file chunk store, and building an iTree through the
//! in-process pattern server, including latest-model selection.

use motif_cli::commands::{self, PatternReport};
use motif_cli::config::Config;
use motif_cluster::ModelKey;
use motif_runtime::{Event, ITreeRequest};
use std::io::Write;

fn write_log(events: &[Event]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for event in events {
        writeln!(file, "{}", event.to_line()).unwrap();
    }
    file
}

/// Eight users land; those who search mostly convert.
fn funnel() -> Vec<Event> {
    let mut events = Vec::new();
    for u in 0..8 {
        let user = format!("user{:02}", u);
        let mut t = 1_000 + u as i64;
        let mut push = |name: &str, events: &mut Vec<Event>| {
            events.push(Event::new(user.as_str(), name, t).with_event_property("device", "web"));
            t += 10;
        };
        push("land", &mut events);
        if u < 4 {
            push("search", &mut events);
            push("search", &mut events);
            push("buy", &mut events);
        } else if u == 4 {
            push("buy", &mut events);
        }
    }
    events
}

#[test]
fn schema_reports_properties() {
    let log = write_log(&funnel());
    let (schema, stats) = commands::schema(log.path()).unwrap();
    assert_eq!(stats.users, 8);
    assert_eq!(stats.first_timestamp, Some(1_000));
    assert!(schema.contains_event("search"));
    assert!(schema.event_info("buy").unwrap().categorical.contains_key("device"));
}

#[test]
fn count_reports_users_and_occurrences() {
    let log = write_log(&funnel());
    let mut config = Config::default();
    config.counting.occurrence_counting = true;
    let patterns = vec![
        commands::parse_pattern("land,buy").unwrap(),
        commands::parse_pattern("search").unwrap(),
    ];
    let (counted, summary) = commands::count(log.path(), &patterns, &config).unwrap();
    assert_eq!(summary.users, 8);

    let reports: Vec<PatternReport> = counted.iter().map(PatternReport::from).collect();
    assert_eq!(reports[0].pattern, "land,buy");
    assert_eq!(reports[0].per_user_count, 5);
    assert_eq!(reports[0].total_user_count, 8);
    assert_eq!(reports[1].per_user_count, 4);
    assert_eq!(reports[1].per_occurrence_count, 8);
}

#[test]
fn mine_then_explain() {
    let log = write_log(&funnel());
    let store = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.patterns_per_chunk = 3;

    let key = ModelKey::new("shop", "day1").unwrap();
    let report = commands::mine(log.path(), &key, store.path(), &config).unwrap();
    assert_eq!(report.total_users, 8);
    assert_eq!(report.total_event_count, 8 + 8 + 5);
    assert!(report.chunks >= 2);
    assert!(store.path().join("shop/day1/manifest.json").exists());

    let request = ITreeRequest::new("t1", "buy");
    let tree = commands::itree(store.path(), "shop", None, &request, &config).unwrap();
    assert_eq!(tree.root().population, 8);
    assert_eq!(tree.root().goal_count, 5);
    let best = tree.children(0).next().unwrap();
    assert_eq!(best.inserted_event.as_deref(), Some("search"));
    assert_eq!(best.goal_count, 4);

    let text = commands::render_tree(&tree);
    assert!(text.starts_with("[buy] 5/8"));
    assert!(text.contains("[search > buy] 4/4"));
}

#[test]
fn explain_unknown_project_fails() {
    let store = tempfile::tempdir().unwrap();
    let request = ITreeRequest::new("t2", "buy");
    assert!(commands::itree(store.path(), "nobody", None, &request, &Config::default()).is_err());
}
