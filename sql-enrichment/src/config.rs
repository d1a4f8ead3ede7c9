use envconfig::Envconfig;
use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("expected a boolean, got {s:?}")),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Process settings for the `sql-enrichment` binary.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Path to the self-describing enrichment configuration
    #[envconfig(from = "ENRICHMENT_CONFIG")]
    pub enrichment_config: PathBuf,

    /// Worker threads of the dedicated database runtime
    #[envconfig(from = "DB_WORKER_THREADS", default = "4")]
    pub db_worker_threads: usize,

    /// Database tasks allowed in flight at once; further work waits
    #[envconfig(from = "MAX_IN_FLIGHT_QUERIES", default = "32")]
    pub max_in_flight_queries: usize,

    /// Events enriched concurrently
    #[envconfig(from = "MAX_CONCURRENT_EVENTS", default = "256")]
    pub max_concurrent_events: usize,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,
}
