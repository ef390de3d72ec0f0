//! Newline-delimited JSON message ingestion.

use crate::handlers::dispatch;
use crate::state::AppState;
use strata_core::FlowEnvelope;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Counters of one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages handled.
    pub handled: u64,
    /// Lines that were not a valid message.
    pub rejected: u64,
    /// Messages whose handler could not reach the metadata store.
    pub failed: u64,
}

/// Read envelopes line by line and dispatch them in order.
///
/// A bad line or a failing message is logged and skipped; only a read error
/// on the input itself ends the run early.
pub async fn ingest_lines<R>(state: &AppState, reader: R) -> std::io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match FlowEnvelope::from_json_line(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(line = line_no, error = %e, "rejected message");
                continue;
            }
        };
        let message = envelope.message.name();
        let tenant = envelope.tenant.clone();
        match dispatch(state, envelope).await {
            Ok(()) => stats.handled += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::error!(
                    line = line_no,
                    tenant = %tenant,
                    message,
                    error = %e,
                    code = e.code(),
                    "message handling failed"
                );
            }
        }
    }

    tracing::info!(
        handled = stats.handled,
        rejected = stats.rejected,
        failed = stats.failed,
        "ingestion done"
    );
    Ok(stats)
}
