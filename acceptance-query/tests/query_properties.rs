// Properties of the query front end that hold for any run
use acceptance_query::query::approx_eq;
use acceptance_query::{normalize, normalize_column, parse, ComparisonOperator};
use std::collections::HashSet;

const QUERIES: &[&str] = &[
    "count(aggregate | some > 1 and #(event) == True) = 0",
    "count(aggregate | some == 0 and some-2 == 1) > 0",
    "count(AgentId | #(Lane Change):Target Lane == 'left' and #(Collision) == False) >= 1",
    "sum(Velocity | #(A/B):key != 'x-2' or Velocity-10 < 3) < 100",
    "mean(Velocity | #(Speeding) and not #(Collision)) ~= 12.5",
    "max(aggregate-0 | #(e1):k1 == 1 | #(e2):k2 == 2) <= -1",
    "max(#(Brake):Level | #(Brake) == True) > 1",
    "count(#(Lane Change) | speed-1.5 > 0) >= 0",
];

#[test]
fn test_rewritten_filters_never_contain_event_references() {
    for raw in QUERIES {
        let query = parse(raw).unwrap();
        assert!(!query.residual_filter.contains("#("), "{}", raw);
        assert!(!query.rewritten_text.contains("#("), "{}", raw);
    }
}

#[test]
fn test_reparsing_yields_identical_queries() {
    for raw in QUERIES {
        let first = parse(raw).unwrap();
        let second = parse(raw).unwrap();
        assert_eq!(first.shifted_columns, second.shifted_columns);
        assert_eq!(first, second);
    }
}

#[test]
fn test_quoted_dash_digits_stay_literal() {
    let query = parse("count(AgentId | name == 'some-2' and other != \"x-10\") = 0").unwrap();
    assert!(query.shifted_columns.is_empty());
    assert!(query.residual_filter.contains("'some-2'"));
    assert!(query.residual_filter.contains("\"x-10\""));
}

#[test]
fn test_event_and_shift_rewrites() {
    let query = parse("count(aggregate | some > 1 and #(event) == True) = 0").unwrap();
    assert_eq!(
        query.rewritten_text,
        "count(aggregate | some > 1 and Event_event == True) = 0"
    );
    assert_eq!(query.referenced_events.len(), 1);
    assert!(query.referenced_events["event"].is_empty());
    assert!(query.shifted_columns.is_empty());

    let query = parse("count(aggregate | some == 0 and some-2 == 1) > 0").unwrap();
    assert_eq!(
        query.rewritten_text,
        "count(aggregate | some == 0 and some_prev2 == 1) > 0"
    );
    assert_eq!(query.shifted_columns.len(), 1);
    let shift = &query.shifted_columns[0];
    assert_eq!(
        (shift.name.as_str(), shift.source.as_str(), shift.shift),
        ("some_prev2", "some", 2)
    );
    assert_eq!(query.operator, ComparisonOperator::Gt);
}

#[test]
fn test_normalization_is_injective_over_the_alphabet() {
    let alphabet = ['a', 'Z', '0', '_', ' ', '/'];
    let mut names = vec![String::new()];
    for _ in 0..3 {
        let longer: Vec<String> = names
            .iter()
            .flat_map(|n| alphabet.iter().map(move |c| format!("{}{}", n, c)))
            .collect();
        names.extend(longer);
    }
    names.sort();
    names.dedup();

    let events: HashSet<String> = names.iter().map(|n| normalize(n)).collect();
    assert_eq!(events.len(), names.len());

    let mut columns = HashSet::new();
    for event in names.iter().take(60) {
        for key in names.iter().take(60) {
            assert!(columns.insert(normalize_column(key, event)), "{:?}/{:?}", event, key);
        }
    }
}

#[test]
fn test_normalized_names_are_identifiers() {
    for name in ["Lane Change", "A/B", "with_underscore", "Ünïcode-name!"] {
        let normalized = normalize(name);
        assert!(normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_eq!(normalized, normalize(name));
    }
}

#[test]
fn test_approximate_equality_is_relative() {
    assert!(approx_eq(100.0001, 100.0));
    assert!(approx_eq(99.9999, 100.0));
    assert!(!approx_eq(100.001, 100.0));
    assert!(!approx_eq(0.0000001, 0.0));
    assert!(approx_eq(0.0, 0.0));
    assert!(approx_eq(-100.00005, -100.0));
}

#[test]
fn test_malformed_queries_are_rejected() {
    for raw in [
        "",
        "count(AgentId | x > 1)",
        "avg(AgentId | x > 1) > 0",
        "count AgentId | x > 1 > 0",
        "count(AgentId | x > ) > 0",
        "count(AgentId | x > 1) > zero",
    ] {
        let err = parse(raw).unwrap_err();
        assert!(
            matches!(err, acceptance_query::QueryError::MalformedQuery { .. }),
            "{:?} -> {}",
            raw,
            err
        );
    }
}
