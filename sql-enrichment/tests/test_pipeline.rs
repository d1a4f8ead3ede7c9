use anyhow::Result;
use assert_json_diff::assert_json_eq;
use serde_json::{json, Value};
use std::sync::Arc;

use sql_enrichment::pipeline::enrich_lines;
use sql_enrichment::test_utils::{
    account_row, build_enrichment, single_input_config, FakeConnectionSource,
};

fn outcome_for<'a>(outcomes: &'a [Value], event_id: &str) -> &'a Value {
    outcomes
        .iter()
        .find(|o| o["event_id"] == event_id)
        .unwrap_or_else(|| panic!("no outcome for {event_id}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_event_gets_one_outcome() -> Result<()> {
    let source = FakeConnectionSource::returning(vec![account_row("pro", 5)]);
    let enrichment = Arc::new(build_enrichment(&single_input_config(true), source.clone()));

    let input = [
        r#"{"event_id": "e-1", "fields": {"user_id": "u-1"}}"#,
        "",
        "not json",
        r#"{"event_id": "e-2", "fields": {}}"#,
        r#"{"event_id": "e-3", "fields": {"user_id": "u-1"}}"#,
    ]
    .join("\n");
    let mut output = Vec::new();

    let written = enrich_lines(enrichment, input.as_bytes(), &mut output, 4).await?;

    assert_eq!(written, 4);
    let outcomes = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<Vec<Value>, _>>()?;
    assert_eq!(outcomes.len(), 4);

    let expected_contexts = json!([{
        "schema": "iglu:com.acme/account/jsonschema/1-0-0",
        "data": {"planName": "pro", "seats": 5}
    }]);
    for event_id in ["e-1", "e-3"] {
        let outcome = outcome_for(&outcomes, event_id);
        assert_eq!(outcome["status"], "enriched");
        assert_json_eq!(outcome["derived_contexts"].clone(), expected_contexts.clone());
    }

    let failed = outcome_for(&outcomes, "e-2");
    assert_eq!(failed["status"], "failed");
    assert!(failed["failure"]["messages"][0]
        .as_str()
        .is_some_and(|m| m.contains("placeholder 1")));

    let invalid = outcomes
        .iter()
        .find(|o| o["status"] == "invalid")
        .expect("malformed line is reported");
    assert_eq!(invalid["line"], 3);

    // e-1 and e-3 share a cache key.
    assert!(source.queries() <= 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_input_writes_nothing() -> Result<()> {
    let source = FakeConnectionSource::returning(Vec::new());
    let enrichment = Arc::new(build_enrichment(&single_input_config(true), source));
    let mut output = Vec::new();

    let written = enrich_lines(enrichment, &b""[..], &mut output, 4).await?;

    assert_eq!(written, 0);
    assert!(output.is_empty());
    Ok(())
}
