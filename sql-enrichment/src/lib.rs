pub mod api;
pub mod config;
pub mod database;
pub mod enrichment;
pub mod enrichment_conf;
pub mod inputs;
pub mod metrics_consts;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod schema;

// Shared with the integration tests under tests/, so it is compiled into the
// library rather than gated on cfg(test).
pub mod test_utils;

pub use enrichment::{LookupResult, SqlQueryEnrichment};
pub use enrichment_conf::SqlQueryConf;
