use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::api::EnrichmentFailure;
use crate::enrichment::SqlQueryEnrichment;
use crate::inputs::EventContext;
use crate::schema::SelfDescribingJson;

/// One NDJSON input line.
#[derive(Debug, Deserialize)]
pub struct InputEvent {
    pub event_id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub contexts: Vec<SelfDescribingJson>,
    #[serde(default)]
    pub derived_contexts: Vec<SelfDescribingJson>,
    #[serde(default)]
    pub unstruct_event: Option<SelfDescribingJson>,
}

/// One NDJSON output line.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Enriched {
        event_id: String,
        derived_contexts: Vec<SelfDescribingJson>,
    },
    Failed {
        event_id: String,
        failure: EnrichmentFailure,
    },
    Invalid {
        line: usize,
        error: String,
    },
}

/// Enriches NDJSON events from `input` and writes one NDJSON outcome per
/// event to `output`, up to `max_concurrent_events` at a time.
///
/// Outcomes are written in completion order; the event id ties each one back
/// to its input. Returns the number of outcomes written. Only I/O errors stop
/// the stream.
pub async fn enrich_lines<R, W>(
    enrichment: Arc<SqlQueryEnrichment>,
    input: R,
    output: &mut W,
    max_concurrent_events: usize,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let lines = stream::unfold(input.lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), lines)),
            Ok(None) => None,
            Err(e) => Some((Err(e), lines)),
        }
    });

    let outcomes = lines
        .enumerate()
        .map(|(index, line)| {
            let enrichment = enrichment.clone();
            async move {
                let line = line.context("failed to read input")?;
                Ok::<_, anyhow::Error>(process_line(&enrichment, index + 1, &line).await)
            }
        })
        .buffer_unordered(max_concurrent_events.max(1));
    let mut outcomes = std::pin::pin!(outcomes);

    let mut written: u64 = 0;
    while let Some(outcome) = outcomes.next().await {
        let Some(outcome) = outcome? else {
            continue;
        };
        let mut out = serde_json::to_vec(&outcome)?;
        out.push(b'\n');
        output.write_all(&out).await?;
        written += 1;
    }
    output.flush().await?;
    Ok(written)
}

/// Blank lines produce no output.
async fn process_line(
    enrichment: &SqlQueryEnrichment,
    line_number: usize,
    line: &str,
) -> Option<Outcome> {
    if line.trim().is_empty() {
        return None;
    }

    let event: InputEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(line = line_number, error = %e, "Skipping malformed event");
            return Some(Outcome::Invalid {
                line: line_number,
                error: e.to_string(),
            });
        }
    };

    let context = EventContext::new(&event.fields)
        .with_contexts(&event.contexts)
        .with_derived_contexts(&event.derived_contexts)
        .with_unstruct_event(event.unstruct_event.as_ref());

    Some(match enrichment.lookup(&context).await {
        Ok(derived_contexts) => Outcome::Enriched {
            event_id: event.event_id,
            derived_contexts,
        },
        Err(failure) => Outcome::Failed {
            event_id: event.event_id,
            failure,
        },
    })
}
