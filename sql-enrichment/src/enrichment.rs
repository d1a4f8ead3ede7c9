use common_cache::{CacheStats, SingleFlightCache};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;

use crate::api::errors::{EnrichmentError, EnrichmentFailure};
use crate::database::{
    BlockingDispatcher, DatabaseError, DispatchPermit, MySqlSource, PostgresSource, Rdbms,
    SharedConnectionSource, SqlConnection, Stage,
};
use crate::enrichment_conf::SqlQueryConf;
use crate::inputs::{build_placeholder_map, EventContext, Input, PlaceholderMap};
use crate::metrics_consts::{
    CACHE_EVICTIONS_COUNTER, CACHE_HITS_COUNTER, CACHE_MISSES_COUNTER, DB_QUERIES_COUNTER,
    DB_RELEASE_ERRORS_COUNTER, DISPATCHER_AVAILABLE_PERMITS, ERRORS_COUNTER, LOOKUPS_COUNTER,
    QUERY_TIME,
};
use crate::output::Output;
use crate::query::Query;
use crate::schema::{SchemaKey, SelfDescribingJson};

pub type LookupResult = Result<Vec<SelfDescribingJson>, EnrichmentFailure>;

type Connection = Box<dyn SqlConnection>;

/// Looks up extra contexts for events in a relational database.
///
/// For each event:
/// 1. Inputs are resolved into a [`PlaceholderMap`]; nothing resolved means
///    the lookup is skipped
/// 2. The cache is checked without a connection
/// 3. On a miss the lookup reserves a dispatcher slot, which it keeps until
///    the connection is released, and acquires a connection. The cache is
///    then consulted again through its single-flight entry, since another
///    lookup may have filled it while this one waited for the connection
/// 4. Only the caller that owns the single-flight load runs the query and
///    envelopes the rows
/// 5. The connection is released whatever happened
///
/// Every failure comes back as an [`EnrichmentFailure`].
pub struct SqlQueryEnrichment {
    schema_key: SchemaKey,
    inputs: Vec<Input>,
    query: Arc<Query>,
    output: Output,
    cache: SingleFlightCache<PlaceholderMap, Vec<SelfDescribingJson>>,
    source: SharedConnectionSource,
    dispatcher: BlockingDispatcher,
}

impl SqlQueryEnrichment {
    pub fn new(
        conf: SqlQueryConf,
        source: SharedConnectionSource,
        dispatcher: BlockingDispatcher,
    ) -> Self {
        Self {
            schema_key: conf.schema_key,
            inputs: conf.inputs,
            query: Arc::new(conf.query),
            output: conf.output,
            cache: SingleFlightCache::new(conf.cache),
            source,
            dispatcher,
        }
    }

    /// Builds the configured driver's pool and a dispatcher, both on
    /// `db_runtime`.
    pub fn from_conf(conf: SqlQueryConf, db_runtime: Handle, max_in_flight: usize) -> Self {
        let pool = conf.database.pool;
        let source: SharedConnectionSource = match &conf.database.rdbms {
            Rdbms::Postgresql(params) => {
                Arc::new(PostgresSource::connect_lazy(&db_runtime, params, &pool))
            }
            Rdbms::Mysql(params) => Arc::new(MySqlSource::connect_lazy(&db_runtime, params, &pool)),
        };
        tracing::info!(
            enrichment = %conf.schema_key,
            rdbms = conf.database.rdbms.name(),
            max_connections = pool.max_connections,
            cache_size = conf.cache.max_entries,
            cache_ttl_ms = conf.cache.ttl.as_millis() as u64,
            "Configured SQL query enrichment"
        );
        let dispatcher = BlockingDispatcher::new(db_runtime, max_in_flight, pool.stage_timeouts());
        Self::new(conf, source, dispatcher)
    }

    pub fn schema_key(&self) -> &SchemaKey {
        &self.schema_key
    }

    /// Returns the contexts to attach to the event. A skipped lookup is an
    /// empty list.
    pub async fn lookup(&self, event: &EventContext<'_>) -> LookupResult {
        match self.try_lookup(event).await {
            Ok(None) => {
                counter!(LOOKUPS_COUNTER, "outcome" => "skipped").increment(1);
                Ok(Vec::new())
            }
            Ok(Some(contexts)) => {
                counter!(LOOKUPS_COUNTER, "outcome" => "success").increment(1);
                Ok(contexts)
            }
            Err(error) => {
                counter!(LOOKUPS_COUNTER, "outcome" => "failure").increment(1);
                counter!(ERRORS_COUNTER, "reason" => error.error_code()).increment(1);
                tracing::warn!(
                    enrichment = %self.schema_key,
                    reason = error.error_code(),
                    error = %error,
                    "SQL enrichment lookup failed"
                );
                Err(EnrichmentFailure::new(self.schema_key.clone(), &error))
            }
        }
    }

    async fn try_lookup(
        &self,
        event: &EventContext<'_>,
    ) -> Result<Option<Vec<SelfDescribingJson>>, EnrichmentError> {
        let Some(key) = build_placeholder_map(&self.inputs, event)? else {
            return Ok(None);
        };

        if let Some(contexts) = self.cache.get(&key).await {
            counter!(CACHE_HITS_COUNTER, "phase" => "before_acquire").increment(1);
            return Ok(Some(contexts));
        }

        let permit = self.dispatcher.reserve().await?;
        let mut connection = Some(self.acquire(&permit).await?);
        let evaluated = self
            .cache
            .evaluate_for_key(key.clone(), self.execute(&key, &permit, &mut connection))
            .await;

        // Gone when the query timed out or panicked; it was dropped with the
        // task that owned it.
        if let Some(connection) = connection.take() {
            self.release(&permit, connection).await;
        }
        drop(permit);

        let result = evaluated.map_err(|e| EnrichmentError::clone(&e))?;
        if result.was_cached() {
            counter!(CACHE_HITS_COUNTER, "phase" => "after_acquire").increment(1);
        }
        Ok(Some(result.into_value()))
    }

    /// The single-flight loader. Borrows the connection from `slot` for the
    /// query and puts it back afterwards.
    async fn execute(
        &self,
        key: &PlaceholderMap,
        permit: &DispatchPermit,
        slot: &mut Option<Connection>,
    ) -> Result<Vec<SelfDescribingJson>, EnrichmentError> {
        counter!(CACHE_MISSES_COUNTER).increment(1);

        if !self.query.is_satisfied_by(key) {
            tracing::debug!(
                enrichment = %self.schema_key,
                provided = key.len(),
                expected = self.query.placeholder_count(),
                "Not every placeholder has a value, skipping query"
            );
            return Ok(Vec::new());
        }

        let Some(mut connection) = slot.take() else {
            return Err(EnrichmentError::Connection(DatabaseError::Acquire(
                "connection is no longer available".to_string(),
            )));
        };
        let query = Arc::clone(&self.query);
        let params = key.clone();

        let start = Instant::now();
        let (connection, rows) = self
            .dispatcher
            .run(permit, Stage::Query, async move {
                let rows = connection.query(&query, &params).await;
                (connection, rows)
            })
            .await?;
        *slot = Some(connection);
        histogram!(QUERY_TIME).record(start.elapsed().as_millis() as f64);
        counter!(DB_QUERIES_COUNTER).increment(1);

        let rows = rows.map_err(EnrichmentError::Execution)?;
        Ok(self.output.envelope(self.output.convert(rows))?)
    }

    async fn acquire(&self, permit: &DispatchPermit) -> Result<Connection, EnrichmentError> {
        let source = Arc::clone(&self.source);
        self.dispatcher
            .run(permit, Stage::Acquire, async move { source.acquire().await })
            .await?
            .map_err(EnrichmentError::Connection)
    }

    /// Failures here are logged and never reach the caller.
    async fn release(&self, permit: &DispatchPermit, connection: Connection) {
        let error = match self
            .dispatcher
            .run(permit, Stage::Release, connection.release())
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        counter!(DB_RELEASE_ERRORS_COUNTER).increment(1);
        tracing::warn!(
            enrichment = %self.schema_key,
            error = %error,
            "Failed to release database connection"
        );
    }

    /// Exact cache counters, after applying pending evictions.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        self.cache.stats()
    }

    pub async fn report_metrics(&self) {
        let stats = self.cache_stats().await;
        counter!(CACHE_EVICTIONS_COUNTER).absolute(stats.size_evictions);
        gauge!(DISPATCHER_AVAILABLE_PERMITS).set(self.dispatcher.available_permits() as f64);
    }
}
