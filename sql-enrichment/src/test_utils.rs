use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::database::{
    BlockingDispatcher, ConnectionSource, DatabaseError, ResultRow, SqlConnection,
};
use crate::enrichment::SqlQueryEnrichment;
use crate::enrichment_conf::SqlQueryConf;
use crate::inputs::PlaceholderMap;
use crate::query::Query;

/// A valid configuration document: a required `user_id` event field and an
/// optional session id read from a custom context.
pub fn sample_config() -> Value {
    json!({
        "schema": "iglu:com.snowplowanalytics.snowplow.enrichments/sql_query_enrichment_config/jsonschema/1-0-0",
        "data": {
            "name": "sql_query_enrichment_config",
            "vendor": "com.snowplowanalytics.snowplow.enrichments",
            "enabled": true,
            "parameters": {
                "inputs": [
                    {"placeholder": 1, "pojo": {"field": "user_id"}, "required": true},
                    {
                        "placeholder": 2,
                        "json": {
                            "field": "contexts",
                            "schemaCriterion": "iglu:com.acme/session/jsonschema/1-*-*",
                            "jsonPath": "$.sessionId"
                        }
                    }
                ],
                "database": {
                    "postgresql": {
                        "host": "localhost",
                        "port": 5432,
                        "sslMode": false,
                        "username": "enricher",
                        "password": "enricher",
                        "database": "accounts"
                    }
                },
                "query": {
                    "sql": "SELECT plan_name, seats FROM accounts WHERE user_id = ? AND session_id = ?"
                },
                "output": {
                    "expectedRows": "AT_MOST_ONE",
                    "json": {
                        "schema": "iglu:com.acme/account/jsonschema/1-0-0",
                        "describes": "EVERY_ROW",
                        "propertyNames": "CAMEL_CASE"
                    }
                },
                "cache": {"size": 1000, "ttl": 60000}
            }
        }
    })
}

/// Replaces the inputs and query of [`sample_config`] with a single
/// `user_id` placeholder.
pub fn single_input_config(required: bool) -> Value {
    let mut config = sample_config();
    let parameters = &mut config["data"]["parameters"];
    parameters["inputs"] =
        json!([{"placeholder": 1, "pojo": {"field": "user_id"}, "required": required}]);
    parameters["query"] = json!({"sql": "SELECT plan_name, seats FROM accounts WHERE user_id = ?"});
    config
}

pub fn event_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => Map::from_iter([("value".to_string(), other)]),
    }
}

pub fn account_row(plan: &str, seats: i64) -> ResultRow {
    vec![
        ("plan_name".to_string(), json!(plan)),
        ("seats".to_string(), json!(seats)),
    ]
}

/// Builds an enrichment over `source` that runs its database work on the
/// current runtime.
pub fn build_enrichment(config: &Value, source: FakeConnectionSource) -> SqlQueryEnrichment {
    build_enrichment_with_permits(config, source, 16)
}

pub fn build_enrichment_with_permits(
    config: &Value,
    source: FakeConnectionSource,
    max_in_flight: usize,
) -> SqlQueryEnrichment {
    let conf = match SqlQueryConf::parse(config) {
        Ok(conf) => conf,
        Err(e) => panic!("test configuration is invalid: {e}"),
    };
    let dispatcher = BlockingDispatcher::new(
        Handle::current(),
        max_in_flight,
        conf.database.pool.stage_timeouts(),
    );
    SqlQueryEnrichment::new(conf, Arc::new(source), dispatcher)
}

/// How a [`FakeConnectionSource`] behaves.
#[derive(Debug, Clone, Default)]
pub struct FakeBehaviour {
    /// Returned by every successful query
    pub rows: Vec<ResultRow>,
    pub query_delay: Duration,
    /// Delays for successive acquire calls; later calls are not delayed
    pub acquire_delays: Vec<Duration>,
    /// The first `failing_queries` queries fail
    pub failing_queries: usize,
    pub fail_acquire: bool,
    pub fail_release: bool,
    /// Connections that can be out at once. Further acquires wait, like a
    /// real pool. Unbounded when `None`.
    pub pool_size: Option<usize>,
}

#[derive(Default)]
struct FakeState {
    acquires: AtomicUsize,
    queries: AtomicUsize,
    releases: AtomicUsize,
    acquire_delays: Mutex<VecDeque<Duration>>,
    seen_params: Mutex<Vec<PlaceholderMap>>,
    pool: Option<Arc<Semaphore>>,
}

/// In-memory connection source that counts what it is asked to do.
#[derive(Clone)]
pub struct FakeConnectionSource {
    behaviour: Arc<FakeBehaviour>,
    state: Arc<FakeState>,
}

impl FakeConnectionSource {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        let state = FakeState {
            acquire_delays: Mutex::new(behaviour.acquire_delays.iter().copied().collect()),
            pool: behaviour.pool_size.map(|size| Arc::new(Semaphore::new(size))),
            ..FakeState::default()
        };
        Self {
            behaviour: Arc::new(behaviour),
            state: Arc::new(state),
        }
    }

    pub fn returning(rows: Vec<ResultRow>) -> Self {
        Self::new(FakeBehaviour {
            rows,
            ..FakeBehaviour::default()
        })
    }

    pub fn acquires(&self) -> usize {
        self.state.acquires.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Parameters of every query, in execution order.
    pub fn seen_params(&self) -> Vec<PlaceholderMap> {
        self.state
            .seen_params
            .lock()
            .map(|params| params.clone())
            .unwrap_or_default()
    }

    fn next_acquire_delay(&self) -> Duration {
        self.state
            .acquire_delays
            .lock()
            .ok()
            .and_then(|mut delays| delays.pop_front())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionSource for FakeConnectionSource {
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        self.state.acquires.fetch_add(1, Ordering::SeqCst);
        let delay = self.next_acquire_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.behaviour.fail_acquire {
            return Err(DatabaseError::Acquire(
                "pool timed out while waiting for an open connection".to_string(),
            ));
        }
        let pooled = match &self.state.pool {
            Some(pool) => Some(pool.clone().acquire_owned().await.map_err(|_| {
                DatabaseError::Acquire("pool closed".to_string())
            })?),
            None => None,
        };
        Ok(Box::new(FakeConnection {
            source: self.clone(),
            _pooled: pooled,
        }))
    }
}

/// Returns its pool slot when dropped, whether released or abandoned.
struct FakeConnection {
    source: FakeConnectionSource,
    _pooled: Option<OwnedSemaphorePermit>,
}

#[async_trait]
impl SqlConnection for FakeConnection {
    async fn query(
        &mut self,
        _query: &Query,
        params: &PlaceholderMap,
    ) -> Result<Vec<ResultRow>, DatabaseError> {
        let behaviour = &self.source.behaviour;
        let state = &self.source.state;

        let n = state.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = state.seen_params.lock() {
            seen.push(params.clone());
        }
        if !behaviour.query_delay.is_zero() {
            tokio::time::sleep(behaviour.query_delay).await;
        }
        if n < behaviour.failing_queries {
            return Err(DatabaseError::Query(
                "relation \"accounts\" does not exist".to_string(),
            ));
        }
        Ok(behaviour.rows.clone())
    }

    async fn release(self: Box<Self>) -> Result<(), DatabaseError> {
        self.source.state.releases.fetch_add(1, Ordering::SeqCst);
        if self.source.behaviour.fail_release {
            return Err(DatabaseError::Release("connection reset by peer".to_string()));
        }
        Ok(())
    }
}
