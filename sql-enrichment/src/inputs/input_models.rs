use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::{SchemaCriterion, SelfDescribingJson};

/// 1-based position of a `?` marker in the query template.
pub type Placeholder = u32;

/// One configured query input: where to find a value and which placeholder
/// it binds to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Input {
    pub placeholder: Placeholder,
    #[serde(flatten)]
    pub source: InputSource,
    /// A required input that cannot be resolved fails the lookup; an optional
    /// one is simply left out of the placeholder map.
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// A field read directly off the event
    Pojo { field: String },
    /// A value inside a context or the unstructured event payload
    Json {
        field: JsonField,
        #[serde(rename = "schemaCriterion")]
        schema_criterion: SchemaCriterion,
        #[serde(rename = "jsonPath")]
        json_path: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonField {
    Contexts,
    DerivedContexts,
    UnstructEvent,
}

impl fmt::Display for JsonField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonField::Contexts => write!(f, "contexts"),
            JsonField::DerivedContexts => write!(f, "derived_contexts"),
            JsonField::UnstructEvent => write!(f, "unstruct_event"),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Pojo { field } => write!(f, "event field {field}"),
            InputSource::Json {
                field,
                schema_criterion,
                json_path,
            } => write!(f, "{json_path} in {field} matching {schema_criterion}"),
        }
    }
}

/// A scalar extracted from an event, bound to a query placeholder.
///
/// Numbers keep their JSON representation so that maps built from the same
/// event data hash and compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PlaceholderValue {
    String(String),
    Number(Number),
    Boolean(bool),
}

impl PlaceholderValue {
    /// Converts a resolved JSON value. Returns `None` for values that cannot
    /// be bound to a single placeholder (arrays, objects, null).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(PlaceholderValue::String(s.clone())),
            Value::Number(n) => Some(PlaceholderValue::Number(n.clone())),
            Value::Bool(b) => Some(PlaceholderValue::Boolean(*b)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for PlaceholderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderValue::String(s) => write!(f, "{s}"),
            PlaceholderValue::Number(n) => write!(f, "{n}"),
            PlaceholderValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Placeholder → value for one event. Compared by content, so it doubles as
/// the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PlaceholderMap(BTreeMap<Placeholder, PlaceholderValue>);

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: Placeholder, value: PlaceholderValue) {
        self.0.insert(placeholder, value);
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&PlaceholderValue> {
        self.0.get(&placeholder)
    }

    pub fn contains(&self, placeholder: Placeholder) -> bool {
        self.0.contains_key(&placeholder)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every placeholder `1..=count` has a value.
    pub fn fills(&self, count: usize) -> bool {
        (1..=count).all(|p| u32::try_from(p).is_ok_and(|p| self.contains(p)))
    }

    /// Values in placeholder order.
    pub fn values(&self) -> impl Iterator<Item = &PlaceholderValue> {
        self.0.values()
    }
}

impl FromIterator<(Placeholder, PlaceholderValue)> for PlaceholderMap {
    fn from_iter<T: IntoIterator<Item = (Placeholder, PlaceholderValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read access to the native fields of an event.
pub trait EventFields: Sync {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl EventFields for Map<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Everything about one event that inputs can read from.
#[derive(Clone, Copy)]
pub struct EventContext<'a> {
    pub fields: &'a dyn EventFields,
    pub contexts: &'a [SelfDescribingJson],
    pub derived_contexts: &'a [SelfDescribingJson],
    pub unstruct_event: Option<&'a SelfDescribingJson>,
}

impl<'a> EventContext<'a> {
    pub fn new(fields: &'a dyn EventFields) -> Self {
        Self {
            fields,
            contexts: &[],
            derived_contexts: &[],
            unstruct_event: None,
        }
    }

    pub fn with_contexts(mut self, contexts: &'a [SelfDescribingJson]) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_derived_contexts(mut self, derived_contexts: &'a [SelfDescribingJson]) -> Self {
        self.derived_contexts = derived_contexts;
        self
    }

    pub fn with_unstruct_event(mut self, unstruct_event: Option<&'a SelfDescribingJson>) -> Self {
        self.unstruct_event = unstruct_event;
        self
    }
}
