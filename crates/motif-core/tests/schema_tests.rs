//! Schema and constraint tests across module boundaries.
//!
//! Covers: schema classification from decoded JSON properties, schema
//! persistence as JSON, and constraint payloads as they arrive from callers.

use motif_core::keys::{generic_dimensions, position_key, split_position_key};
use motif_core::{
    constraints::all_empty, CategoricalConstraint, EventConstraints, NumericConstraint,
    PropertyKind, Properties, UserAndEventsInfo,
};

// =============================================================================
// Schema
// =============================================================================

fn observe_json(schema: &mut UserAndEventsInfo, event: &str, json: &str) {
    let props: Properties = serde_json::from_str(json).unwrap();
    for (key, value) in &props {
        schema.observe_event_property(event, key, value);
    }
}

#[test]
fn schema_from_decoded_properties() {
    let mut schema = UserAndEventsInfo::new();
    observe_json(&mut schema, "checkout", r#"{"amount": 19.5, "currency": "EUR", "gift": true}"#);
    observe_json(&mut schema, "checkout", r#"{"amount": 3, "currency": "INR", "tags": ["a"]}"#);
    observe_json(&mut schema, "view", r#"{"page": null}"#);

    let checkout = schema.event_info("checkout").unwrap();
    assert_eq!(checkout.kind_of("amount"), Some(PropertyKind::Numeric));
    assert_eq!(checkout.kind_of("currency"), Some(PropertyKind::Categorical));
    assert_eq!(checkout.kind_of("gift"), Some(PropertyKind::Categorical));
    assert_eq!(checkout.kind_of("tags"), None);
    assert_eq!(checkout.categorical["currency"].len(), 2);
    assert!(checkout.categorical["gift"].contains("true"));

    // Events with only ignored properties are still registered.
    assert!(schema.contains_event("view"));
    assert!(schema.event_info("view").unwrap().is_empty());
    assert_eq!(schema.event_names().collect::<Vec<_>>(), vec!["checkout", "view"]);
}

#[test]
fn schema_survives_json() {
    let mut schema = UserAndEventsInfo::with_max_categorical_values(8);
    observe_json(&mut schema, "signup", r#"{"plan": "pro", "seats": 4}"#);
    schema.observe_user_property("country", &"IN".into());

    let json = serde_json::to_string(&schema).unwrap();
    let back: UserAndEventsInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(back, schema);
    assert_eq!(back.max_categorical_values, 8);
}

#[test]
fn schema_without_cap_uses_default() {
    let back: UserAndEventsInfo = serde_json::from_str(
        r#"{"user_properties": {"numeric": [], "categorical": {}}, "event_properties": {}}"#,
    )
    .unwrap();
    assert_eq!(back.max_categorical_values, UserAndEventsInfo::new().max_categorical_values);
}

// =============================================================================
// Constraints
// =============================================================================

#[test]
fn constraints_from_caller_payload() {
    let payload = r#"[
        {"ep_numeric": [{"property": "amount", "lower": 10.0}]},
        {},
        {"up_categorical": [{"property": "country", "value": "IN"}]}
    ]"#;
    let constraints: Vec<EventConstraints> = serde_json::from_str(payload).unwrap();
    assert_eq!(constraints.len(), 3);
    assert!(!all_empty(&constraints));
    assert!(constraints[1].is_empty());

    let amount = &constraints[0].ep_numeric[0];
    assert!(!amount.contains(10.0));
    assert!(amount.contains(10.5));
    assert_eq!(
        constraints[2],
        EventConstraints::new().with_user_categorical(CategoricalConstraint::new("country", "IN"))
    );
}

#[test]
fn numeric_bounds_are_half_open() {
    let c = NumericConstraint::between("age", 18.0, 30.0);
    assert!(!c.contains(18.0));
    assert!(c.contains(30.0));
    assert!(NumericConstraint::at_most("age", 5.0).contains(-100.0));
    assert!(NumericConstraint::greater_than("age", 5.0).contains(1e9));
}

#[test]
fn constraint_keys_line_up_with_positions() {
    let key = position_key(3, "amount");
    assert_eq!(split_position_key(&key), Some((3, "amount")));
    let dims = generic_dimensions(2);
    assert_eq!(dims.len(), 9);
    assert_eq!(dims[0], "1.$fSeenOccurrence");
    assert_eq!(dims.last().map(String::as_str), Some("$joinTime"));
}
