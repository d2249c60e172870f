//! Periodic background task draining the durable queue through the
//! Dispatcher. No backoff, no retry cap — a permanently-failing command is
//! retried forever so a transient device outage heals automatically.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::queue::OutboundQueue;

/// Rows fetched per tick; matches spec's "up to 50 unsent rows".
const FLUSH_BATCH: u32 = 50;

/// Run the flush loop until `shutdown` fires. Each tick competes for the
/// Dispatcher with live traffic via the ordinary preemption barrier — a
/// flush invocation is itself preemptible.
pub async fn run(
    dispatcher: Arc<Dispatcher>,
    queue: Arc<OutboundQueue>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => {
                debug!("flusher shutting down");
                return;
            }
        }

        let rows = match queue.get_unsent(FLUSH_BATCH) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "failed to read unsent queue rows");
                continue;
            }
        };

        for row in rows {
            let tokens: Vec<String> = row.cmd.split_whitespace().map(str::to_string).collect();
            let outcome = dispatcher.submit(tokens).await;
            if outcome.rc == 0 {
                let now = now_unix();
                if let Err(err) = queue.mark_sent(row.id, now) {
                    warn!(error = %err, id = row.id, "failed to mark queue row sent");
                }
            } else {
                debug!(id = row.id, rc = outcome.rc, "queued command failed; will retry");
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
