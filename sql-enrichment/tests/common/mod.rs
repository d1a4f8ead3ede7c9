use serde_json::{json, Map, Value};

use sql_enrichment::inputs::EventContext;
use sql_enrichment::schema::{SchemaKey, SelfDescribingJson};

pub const SESSION_SCHEMA: &str = "iglu:com.acme/session/jsonschema/1-0-2";

/// Owns the data an [`EventContext`] borrows.
#[derive(Debug, Clone, Default)]
pub struct TestEvent {
    pub fields: Map<String, Value>,
    pub contexts: Vec<SelfDescribingJson>,
}

impl TestEvent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("user_id".to_string(), user_id.into());
        Self {
            fields,
            contexts: Vec::new(),
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.contexts.push(SelfDescribingJson::new(
            schema(SESSION_SCHEMA),
            json!({"sessionId": session_id}),
        ));
        self
    }

    pub fn context(&self) -> EventContext<'_> {
        EventContext::new(&self.fields).with_contexts(&self.contexts)
    }
}

pub fn schema(uri: &str) -> SchemaKey {
    uri.parse().expect("test schema URI is valid")
}

/// Sets `parameters.database.pool` on a configuration document.
pub fn with_pool(mut config: Value, pool: Value) -> Value {
    config["data"]["parameters"]["database"]["pool"] = pool;
    config
}

pub fn with_output(mut config: Value, output: Value) -> Value {
    config["data"]["parameters"]["output"] = output;
    config
}
