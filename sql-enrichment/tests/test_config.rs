use anyhow::Result;
use assert_json_diff::assert_json_eq;
use serde_json::{json, Map, Value};
use std::time::Duration;

use sql_enrichment::database::Rdbms;
use sql_enrichment::inputs::{EventContext, PlaceholderValue};
use sql_enrichment::output::{Describes, ExpectedRows, PropertyNames};
use sql_enrichment::test_utils::{
    account_row, build_enrichment, single_input_config, FakeConnectionSource,
};
use sql_enrichment::SqlQueryConf;

fn mysql_config() -> Value {
    let mut config = single_input_config(true);
    let parameters = &mut config["data"]["parameters"];
    parameters["database"] = json!({
        "mysql": {
            "host": "db.internal",
            "port": 3306,
            "sslMode": true,
            "username": "enricher",
            "password": "s3cret",
            "database": "crm"
        },
        "pool": {"maxConnections": 4, "queryTimeout": 250}
    });
    parameters["output"] = json!({
        "expectedRows": "EXACTLY_ONE",
        "json": {
            "schema": "iglu:com.acme/account/jsonschema/1-0-0",
            "describes": "EVERY_ROW",
            "propertyNames": "AS_IS",
            "columns": ["seats"]
        }
    });
    config
}

#[test]
fn test_mysql_configuration() -> Result<()> {
    let conf = SqlQueryConf::parse(&mysql_config())?;

    let Rdbms::Mysql(params) = &conf.database.rdbms else {
        panic!("expected a mysql configuration, got {:?}", conf.database.rdbms);
    };
    assert_eq!(params.host, "db.internal");
    assert!(params.ssl_mode);
    assert!(!format!("{params:?}").contains("s3cret"));

    let pool = conf.database.pool;
    assert_eq!(pool.max_connections, 4);
    assert_eq!(pool.query_timeout(), Duration::from_millis(250));
    // Unset pool fields keep their defaults.
    assert_eq!(pool.acquire_timeout(), Duration::from_secs(1));

    assert_eq!(conf.output.expected_rows, ExpectedRows::ExactlyOne);
    assert_eq!(conf.output.json.describes, Describes::EveryRow);
    assert_eq!(conf.output.json.property_names, PropertyNames::AsIs);
    assert_eq!(conf.output.json.columns, Some(vec!["seats".to_string()]));
    Ok(())
}

#[test]
fn test_errors_are_reported_together() {
    let mut config = mysql_config();
    let parameters = &mut config["data"]["parameters"];
    parameters["database"]["postgresql"] = parameters["database"]["mysql"].clone();
    parameters["cache"] = json!({"size": "lots", "ttl": 1000});

    let error = SqlQueryConf::parse(&config).unwrap_err();

    assert_eq!(error.messages().len(), 2);
    assert_eq!(
        error.messages()[0],
        "database must configure only one of postgresql or mysql"
    );
    assert!(error.messages()[1].starts_with("cache: "));
    assert!(error
        .to_string()
        .starts_with("invalid sql query enrichment configuration: database must"));
}

#[tokio::test]
async fn test_columns_restrict_the_output() -> Result<()> {
    let source = FakeConnectionSource::returning(vec![account_row("pro", 5)]);
    let enrichment = build_enrichment(&mysql_config(), source.clone());

    let fields: Map<String, Value> = serde_json::from_value(json!({"user_id": 42}))?;
    let contexts = enrichment
        .lookup(&EventContext::new(&fields))
        .await
        .map_err(|failure| anyhow::anyhow!("{failure}"))?;

    assert_json_eq!(
        serde_json::to_value(&contexts)?,
        json!([{"schema": "iglu:com.acme/account/jsonschema/1-0-0", "data": {"seats": 5}}])
    );
    // Numbers reach the driver as numbers, not as text.
    assert_eq!(
        source.seen_params()[0].get(1),
        Some(&PlaceholderValue::Number(42.into()))
    );
    Ok(())
}

#[tokio::test]
async fn test_comment_markers_do_not_block_the_query() -> Result<()> {
    let mut config = single_input_config(true);
    config["data"]["parameters"]["query"] = json!({
        "sql": "SELECT plan_name, seats FROM accounts /* by owner? */ WHERE user_id = ? -- active?"
    });
    let conf = SqlQueryConf::parse(&config)?;
    assert_eq!(conf.query.placeholder_count(), 1);

    let source = FakeConnectionSource::returning(vec![account_row("pro", 5)]);
    let enrichment = build_enrichment(&config, source.clone());
    let fields: Map<String, Value> = serde_json::from_value(json!({"user_id": "u-1"}))?;
    let contexts = enrichment
        .lookup(&EventContext::new(&fields))
        .await
        .map_err(|failure| anyhow::anyhow!("{failure}"))?;

    assert_eq!(contexts.len(), 1);
    assert_eq!(source.queries(), 1);
    Ok(())
}
