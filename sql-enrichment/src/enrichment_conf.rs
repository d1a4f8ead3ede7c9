use common_cache::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::api::errors::ConfigError;
use crate::database::database_models::DatabaseSection;
use crate::database::DatabaseSettings;
use crate::inputs::{validate_json_path, Input, InputSource};
use crate::output::Output;
use crate::query::Query;
use crate::schema::{SchemaCriterion, SchemaKey, SelfDescribingJson};

pub const SUPPORTED_SCHEMA: &str = "iglu:com.snowplowanalytics.snowplow.enrichments/sql_query_enrichment_config/jsonschema/1-*-*";

/// Everything an enrichment needs, validated. Nothing downstream mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQueryConf {
    pub schema_key: SchemaKey,
    pub inputs: Vec<Input>,
    pub database: DatabaseSettings,
    pub query: Query,
    pub output: Output,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize)]
struct QuerySection {
    sql: String,
}

#[derive(Debug, Deserialize)]
struct CacheSection {
    size: u64,
    /// Milliseconds
    ttl: u64,
}

impl SqlQueryConf {
    /// Parses a self-describing enrichment configuration document.
    ///
    /// Each section of `data.parameters` is parsed independently and every
    /// failure is reported, rather than stopping at the first.
    pub fn parse(config: &Value) -> Result<Self, ConfigError> {
        let document: SelfDescribingJson = serde_json::from_value(config.clone())
            .map_err(|e| ConfigError::single(format!("not a self-describing document: {e}")))?;

        let supported: SchemaCriterion = SUPPORTED_SCHEMA
            .parse()
            .map_err(|e| ConfigError::single(format!("{e}")))?;
        if !supported.matches(&document.schema) {
            return Err(ConfigError::single(format!(
                "schema {} is not supported, expected {SUPPORTED_SCHEMA}",
                document.schema
            )));
        }

        let parameters = document
            .data
            .get("parameters")
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::single("data.parameters must be an object"))?;

        let mut errors = Vec::new();
        let inputs = section::<Vec<Input>>(parameters, "inputs", &mut errors);
        let database = section::<DatabaseSection>(parameters, "database", &mut errors)
            .and_then(|raw| match DatabaseSettings::try_from(raw) {
                Ok(settings) => Some(settings),
                Err(messages) => {
                    errors.extend(messages);
                    None
                }
            });
        let query = section::<QuerySection>(parameters, "query", &mut errors).and_then(|q| {
            Query::parse(&q.sql)
                .map_err(|e| errors.push(format!("query: {e}")))
                .ok()
        });
        let output = section::<Output>(parameters, "output", &mut errors);
        let cache = section::<CacheSection>(parameters, "cache", &mut errors);

        let (Some(inputs), Some(database), Some(query), Some(output), Some(cache)) =
            (inputs, database, query, output, cache)
        else {
            return Err(ConfigError(errors));
        };

        errors.extend(validate_inputs(&inputs, &query));
        if cache.size == 0 {
            errors.push("cache.size must be positive".to_string());
        }
        if cache.ttl == 0 {
            errors.push("cache.ttl must be positive".to_string());
        }
        if !errors.is_empty() {
            return Err(ConfigError(errors));
        }

        Ok(SqlQueryConf {
            schema_key: document.schema,
            inputs,
            database,
            query,
            output,
            cache: CacheConfig::with_ttl_millis(cache.size, cache.ttl),
        })
    }
}

/// Deserializes `parameters[name]`, recording a message on failure.
fn section<T: DeserializeOwned>(
    parameters: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    let Some(value) = parameters.get(name) else {
        errors.push(format!("{name}: missing"));
        return None;
    };
    serde_json::from_value(value.clone())
        .map_err(|e| errors.push(format!("{name}: {e}")))
        .ok()
}

fn validate_inputs(inputs: &[Input], query: &Query) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let count = query.placeholder_count();

    if !inputs.is_empty() && count == 0 {
        errors.push("query.sql has no placeholders but inputs are configured".to_string());
    }

    for input in inputs {
        let placeholder = input.placeholder;
        if placeholder == 0 {
            errors.push("inputs: placeholder indices start at 1".to_string());
        } else if count > 0 && usize::try_from(placeholder).map_or(true, |p| p > count) {
            errors.push(format!(
                "inputs: placeholder {placeholder} exceeds the {count} placeholders in query.sql"
            ));
        }
        if !seen.insert(placeholder) {
            errors.push(format!("inputs: placeholder {placeholder} is used more than once"));
        }
        if let InputSource::Json { json_path, .. } = &input.source {
            if let Err(e) = validate_json_path(json_path) {
                errors.push(format!(
                    "inputs: invalid jsonPath {json_path} for placeholder {placeholder}: {e}"
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Rdbms;
    use crate::test_utils::sample_config;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_parses_sample_config() {
        let conf = SqlQueryConf::parse(&sample_config()).unwrap();

        assert_eq!(conf.schema_key.name, "sql_query_enrichment_config");
        assert_eq!(conf.inputs.len(), 2);
        assert!(matches!(conf.database.rdbms, Rdbms::Postgresql(_)));
        assert_eq!(conf.query.placeholder_count(), 2);
        assert_eq!(conf.cache.max_entries, 1000);
        assert_eq!(conf.cache.ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_collects_errors_from_every_section() {
        let mut config = sample_config();
        let parameters = &mut config["data"]["parameters"];
        parameters["inputs"] = json!("not a list");
        parameters["output"] = json!({"expectedRows": "SOME"});
        parameters.as_object_mut().unwrap().remove("cache");

        let err = SqlQueryConf::parse(&config).unwrap_err();
        let messages = err.messages();

        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages[0].starts_with("inputs:"));
        assert!(messages[1].starts_with("output:"));
        assert_eq!(messages[2], "cache: missing");
    }

    #[test]
    fn test_rejects_unsupported_schema() {
        let mut config = sample_config();
        config["schema"] = json!("iglu:com.acme/other_config/jsonschema/1-0-0");
        let err = SqlQueryConf::parse(&config).unwrap_err();
        assert_eq!(err.messages().len(), 1);
        assert!(err.messages()[0].contains("not supported"));
    }

    #[test]
    fn test_cross_validates_inputs_against_query() {
        let mut config = sample_config();
        config["data"]["parameters"]["inputs"] = json!([
            {"placeholder": 1, "pojo": {"field": "user_id"}},
            {"placeholder": 1, "pojo": {"field": "app_id"}},
            {"placeholder": 3, "pojo": {"field": "platform"}}
        ]);
        config["data"]["parameters"]["cache"] = json!({"size": 0, "ttl": 0});

        let err = SqlQueryConf::parse(&config).unwrap_err();
        let messages = err.messages();

        assert!(messages.iter().any(|m| m.contains("more than once")));
        assert!(messages.iter().any(|m| m.contains("placeholder 3 exceeds")));
        assert!(messages.iter().any(|m| m == "cache.size must be positive"));
        assert!(messages.iter().any(|m| m == "cache.ttl must be positive"));
    }

    #[test]
    fn test_rejects_invalid_json_path() {
        let mut config = sample_config();
        config["data"]["parameters"]["inputs"][1]["json"]["jsonPath"] = json!("$.a[");

        let err = SqlQueryConf::parse(&config).unwrap_err();
        assert!(err.messages()[0].contains("invalid jsonPath"));
    }

    #[test]
    fn test_rejects_empty_sql() {
        let mut config = sample_config();
        config["data"]["parameters"]["query"] = json!({"sql": ""});

        let err = SqlQueryConf::parse(&config).unwrap_err();
        assert_eq!(err.messages(), ["query: query.sql must not be empty"]);
    }
}
