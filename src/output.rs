use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::scanner::ScanStats;

/// Drain `results` until every sender is gone, writing one JSON line per record.
///
/// Records are written in arrival order and flushed one at a time. A record
/// that fails to serialize is logged and skipped; a failed write to the sink
/// ends the run with an error.
pub async fn aggregate<T, W>(
    mut results: mpsc::Receiver<T>,
    sink: &mut W,
    stats: &ScanStats,
) -> Result<u64>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut emitted = 0u64;
    while let Some(record) = results.recv().await {
        let mut line = match serde_json::to_vec(&record) {
            Ok(buf) => buf,
            Err(e) => {
                stats.record_skip();
                warn!(error = %e, "failed to serialize result, skipping");
                continue;
            }
        };
        line.push(b'\n');
        sink.write_all(&line)
            .await
            .context("failed to write result record")?;
        sink.flush().await.context("failed to flush output")?;
        stats.record_emit();
        emitted += 1;
    }
    Ok(emitted)
}
