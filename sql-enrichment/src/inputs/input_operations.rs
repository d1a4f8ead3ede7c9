use jsonpath_lib::select;
use serde_json::Value;

use crate::api::errors::ExtractionError;
use crate::inputs::input_models::{
    EventContext, Input, InputSource, JsonField, PlaceholderMap, PlaceholderValue,
};
use crate::schema::{SchemaCriterion, SelfDescribingJson};

/// Resolves every configured input against one event.
///
/// - `Ok(Some(map))`: at least one input resolved and no required input failed
/// - `Ok(None)`: nothing resolved, there is nothing to look up
/// - `Err(_)`: a required input was missing or could not be bound
///
/// Optional inputs that are missing or unbindable are left out of the map.
pub fn build_placeholder_map(
    inputs: &[Input],
    event: &EventContext<'_>,
) -> Result<Option<PlaceholderMap>, ExtractionError> {
    let mut map = PlaceholderMap::new();

    for input in inputs {
        match resolve(input, event) {
            Ok(Some(value)) => map.insert(input.placeholder, value),
            Ok(None) if input.required => {
                return Err(ExtractionError::MissingRequired {
                    placeholder: input.placeholder,
                    location: input.source.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) if input.required => return Err(e),
            Err(e) => {
                tracing::debug!(
                    placeholder = input.placeholder,
                    error = %e,
                    "Skipping optional input"
                );
            }
        }
    }

    Ok((!map.is_empty()).then_some(map))
}

/// Resolves a single input. `Ok(None)` means the value is absent or null.
fn resolve(
    input: &Input,
    event: &EventContext<'_>,
) -> Result<Option<PlaceholderValue>, ExtractionError> {
    let value = match &input.source {
        InputSource::Pojo { field } => event.fields.field(field).cloned(),
        InputSource::Json {
            field,
            schema_criterion,
            json_path,
        } => {
            let Some(context) = first_matching(candidates(event, *field), schema_criterion) else {
                return Ok(None);
            };
            select_path(&context.data, json_path).map_err(|message| {
                ExtractionError::InvalidPath {
                    placeholder: input.placeholder,
                    path: json_path.clone(),
                    message,
                }
            })?
        }
    };

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => PlaceholderValue::from_json(&value).map(Some).ok_or_else(|| {
            ExtractionError::Unbindable {
                placeholder: input.placeholder,
                location: input.source.to_string(),
                kind: json_kind(&value),
            }
        }),
    }
}

fn candidates<'a>(
    event: &EventContext<'a>,
    field: JsonField,
) -> Box<dyn Iterator<Item = &'a SelfDescribingJson> + 'a> {
    match field {
        JsonField::Contexts => Box::new(event.contexts.iter()),
        JsonField::DerivedContexts => Box::new(event.derived_contexts.iter()),
        JsonField::UnstructEvent => Box::new(event.unstruct_event.into_iter()),
    }
}

fn first_matching<'a>(
    mut contexts: impl Iterator<Item = &'a SelfDescribingJson>,
    criterion: &SchemaCriterion,
) -> Option<&'a SelfDescribingJson> {
    contexts.find(|context| criterion.matches(&context.schema))
}

/// Evaluates `path` against `document`. Several matches are returned as one
/// array, which the caller then rejects as unbindable.
fn select_path(document: &Value, path: &str) -> Result<Option<Value>, String> {
    let matches = select(document, path).map_err(|e| format!("{e:?}"))?;
    match matches.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some((*single).clone())),
        many => Ok(Some(Value::Array(many.iter().map(|v| (*v).clone()).collect()))),
    }
}

/// Checks that `path` is a syntactically valid JSONPath expression.
pub fn validate_json_path(path: &str) -> Result<(), String> {
    select(&Value::Null, path)
        .map(|_| ())
        .map_err(|e| format!("{e:?}"))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::input_models::EventFields;
    use serde_json::{json, Map};

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    fn pojo(placeholder: u32, field: &str, required: bool) -> Input {
        Input {
            placeholder,
            source: InputSource::Pojo {
                field: field.to_string(),
            },
            required,
        }
    }

    fn json_input(placeholder: u32, field: JsonField, path: &str, required: bool) -> Input {
        Input {
            placeholder,
            source: InputSource::Json {
                field,
                schema_criterion: "iglu:com.acme/user/jsonschema/1-*-*".parse().unwrap(),
                json_path: path.to_string(),
            },
            required,
        }
    }

    fn user_context(version: &str, data: Value) -> SelfDescribingJson {
        SelfDescribingJson::new(
            format!("iglu:com.acme/user/jsonschema/{version}")
                .parse()
                .unwrap(),
            data,
        )
    }

    #[test]
    fn test_builds_map_from_event_fields() {
        let event_fields = fields(json!({"user_id": "u-1", "app_id": "shop", "ttl": 30}));
        let event = EventContext::new(&event_fields);
        let inputs = vec![pojo(1, "user_id", true), pojo(2, "ttl", false)];

        let map = build_placeholder_map(&inputs, &event).unwrap().unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(1),
            Some(&PlaceholderValue::String("u-1".to_string()))
        );
        assert_eq!(map.get(2), Some(&PlaceholderValue::Number(30.into())));
    }

    #[test]
    fn test_null_required_field_fails_naming_the_placeholder() {
        let event_fields = fields(json!({"user_id": null}));
        let event = EventContext::new(&event_fields);

        let err = build_placeholder_map(&[pojo(1, "user_id", true)], &event).unwrap_err();

        assert_eq!(err.placeholder(), 1);
        assert!(err.to_string().contains("placeholder 1"));
    }

    #[test]
    fn test_all_optional_and_missing_is_skip() {
        let event_fields = fields(json!({"other": 1}));
        let event = EventContext::new(&event_fields);
        let inputs = vec![pojo(1, "user_id", false), pojo(2, "account", false)];

        assert_eq!(build_placeholder_map(&inputs, &event).unwrap(), None);
    }

    #[test]
    fn test_missing_optional_input_is_omitted() {
        let event_fields = fields(json!({"user_id": "u-1"}));
        let event = EventContext::new(&event_fields);
        let inputs = vec![pojo(1, "user_id", true), pojo(2, "account", false)];

        let map = build_placeholder_map(&inputs, &event).unwrap().unwrap();
        assert!(map.contains(1));
        assert!(!map.contains(2));
    }

    #[test]
    fn test_reads_first_matching_context() {
        let event_fields = Map::new();
        let contexts = vec![
            SelfDescribingJson::new(
                "iglu:com.acme/account/jsonschema/1-0-0".parse().unwrap(),
                json!({"id": "wrong"}),
            ),
            user_context("1-0-0", json!({"id": "first"})),
            user_context("1-1-0", json!({"id": "second"})),
        ];
        let event = EventContext::new(&event_fields).with_contexts(&contexts);
        let inputs = vec![json_input(1, JsonField::Contexts, "$.id", true)];

        let map = build_placeholder_map(&inputs, &event).unwrap().unwrap();
        assert_eq!(
            map.get(1),
            Some(&PlaceholderValue::String("first".to_string()))
        );
    }

    #[test]
    fn test_context_field_selects_the_right_list() {
        let event_fields = Map::new();
        let custom = vec![user_context("1-0-0", json!({"id": "custom"}))];
        let derived = vec![user_context("1-0-0", json!({"id": "derived"}))];
        let unstruct = user_context("1-0-0", json!({"id": "unstruct"}));
        let event = EventContext::new(&event_fields)
            .with_contexts(&custom)
            .with_derived_contexts(&derived)
            .with_unstruct_event(Some(&unstruct));

        let inputs = vec![
            json_input(1, JsonField::Contexts, "$.id", true),
            json_input(2, JsonField::DerivedContexts, "$.id", true),
            json_input(3, JsonField::UnstructEvent, "$.id", true),
        ];
        let map = build_placeholder_map(&inputs, &event).unwrap().unwrap();

        let values: Vec<String> = map.values().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["custom", "derived", "unstruct"]);
    }

    #[test]
    fn test_no_matching_context_for_required_input_fails() {
        let event_fields = Map::new();
        let contexts = vec![user_context("2-0-0", json!({"id": "too-new"}))];
        let event = EventContext::new(&event_fields).with_contexts(&contexts);

        let err = build_placeholder_map(
            &[json_input(4, JsonField::Contexts, "$.id", true)],
            &event,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingRequired { placeholder: 4, .. }
        ));
    }

    #[test]
    fn test_object_value_is_unbindable() {
        let event_fields = Map::new();
        let contexts = vec![user_context("1-0-0", json!({"profile": {"age": 3}}))];
        let event = EventContext::new(&event_fields).with_contexts(&contexts);

        let required = build_placeholder_map(
            &[json_input(1, JsonField::Contexts, "$.profile", true)],
            &event,
        );
        assert!(matches!(
            required,
            Err(ExtractionError::Unbindable {
                kind: "an object",
                ..
            })
        ));

        let optional = build_placeholder_map(
            &[json_input(1, JsonField::Contexts, "$.profile", false)],
            &event,
        );
        assert_eq!(optional, Ok(None));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let event_fields = fields(json!({"user_id": "u-1", "flag": true}));
        let event = EventContext::new(&event_fields);
        let inputs = vec![pojo(2, "flag", true), pojo(1, "user_id", true)];

        let first = build_placeholder_map(&inputs, &event).unwrap();
        let second = build_placeholder_map(&inputs, &event).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_json_path() {
        assert!(validate_json_path("$.user.id").is_ok());
        assert!(validate_json_path("$.a[").is_err());
    }

    #[test]
    fn test_event_fields_for_map() {
        let event_fields = fields(json!({"a": 1}));
        assert_eq!(event_fields.field("a"), Some(&json!(1)));
        assert_eq!(event_fields.field("b"), None);
    }
}
