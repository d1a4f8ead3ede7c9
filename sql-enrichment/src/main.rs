use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use serde_json::Value;
use tokio::io::BufReader;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use sql_enrichment::config::Config;
use sql_enrichment::pipeline::enrich_lines;
use sql_enrichment::{SqlQueryConf, SqlQueryEnrichment};

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing(debug: bool) {
    // stdout carries results, so logs go to stderr
    let base_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base_layer
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

fn main() -> Result<()> {
    let config = Config::init_from_env().context("invalid process configuration")?;
    init_tracing(*config.debug);

    let raw = std::fs::read_to_string(&config.enrichment_config).with_context(|| {
        format!(
            "failed to read enrichment configuration from {}",
            config.enrichment_config.display()
        )
    })?;
    let document: Value =
        serde_json::from_str(&raw).context("enrichment configuration is not valid JSON")?;
    let conf = SqlQueryConf::parse(&document)?;

    // Database work gets its own runtime so slow queries never occupy the
    // workers that read, enrich and write events.
    let db_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.db_worker_threads)
        .thread_name("sql-enrichment-db")
        .enable_all()
        .build()
        .context("failed to build database runtime")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sql-enrichment")
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let enrichment = SqlQueryEnrichment::from_conf(
        conf,
        db_runtime.handle().clone(),
        config.max_in_flight_queries,
    );

    let result = runtime.block_on(run(Arc::new(enrichment), config.max_concurrent_events));

    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    db_runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn run(enrichment: Arc<SqlQueryEnrichment>, max_concurrent_events: usize) -> Result<()> {
    tracing::info!(
        enrichment = %enrichment.schema_key(),
        max_concurrent_events,
        "Reading events from stdin"
    );

    let reporter = {
        let enrichment = enrichment.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_REPORT_INTERVAL);
            loop {
                interval.tick().await;
                enrichment.report_metrics().await;
            }
        })
    };

    let mut stdout = tokio::io::stdout();
    let processed = enrich_lines(
        enrichment.clone(),
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
        max_concurrent_events,
    )
    .await?;

    reporter.abort();
    enrichment.report_metrics().await;
    let stats = enrichment.cache_stats().await;
    tracing::info!(
        processed,
        cache_entries = stats.entry_count,
        cache_evictions = stats.size_evictions,
        cache_expirations = stats.expirations,
        "Finished reading events"
    );
    Ok(())
}
