// Lookup outcomes, labelled outcome=skipped|success|failure
pub const LOOKUPS_COUNTER: &str = "sql_enrichment_lookups_total";

// Cache, hits labelled phase=before_acquire|after_acquire
pub const CACHE_HITS_COUNTER: &str = "sql_enrichment_cache_hits_total";
pub const CACHE_MISSES_COUNTER: &str = "sql_enrichment_cache_misses_total";
pub const CACHE_EVICTIONS_COUNTER: &str = "sql_enrichment_cache_evictions_total";

// Database
pub const DB_QUERIES_COUNTER: &str = "sql_enrichment_db_queries_total";
pub const DB_RELEASE_ERRORS_COUNTER: &str = "sql_enrichment_db_release_errors_total";
pub const QUERY_TIME: &str = "sql_enrichment_query_time";
pub const DISPATCHER_AVAILABLE_PERMITS: &str = "sql_enrichment_dispatcher_available_permits";

// Errors, labelled reason=<EnrichmentError::error_code>
pub const ERRORS_COUNTER: &str = "sql_enrichment_errors_total";
