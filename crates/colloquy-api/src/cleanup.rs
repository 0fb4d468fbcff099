use std::time::Duration;

use tracing::info;

use crate::hub::StreamHub;

/// Background task that prunes finished streams.
///
/// Runs on an interval and drops buffers of streams that finished more than
/// `retention` ago. Resume requests for them then report that no stream is
/// active.
pub async fn run_cleanup_loop(hub: StreamHub, retention: Duration, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        let count = hub.prune_finished(retention).await;
        if count > 0 {
            info!("Cleanup: pruned {} finished streams", count);
        }
    }
}
