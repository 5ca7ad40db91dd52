//! Periodic export of view snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{Metrics, ViewData};

/// Receives snapshots of every view.
pub trait Reporter: Send + Sync {
    fn report(&self, snapshot: &[ViewData]);
}

/// Writes every row through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, snapshot: &[ViewData]) {
        for row in snapshot {
            info!(
                target: "hydra::metrics",
                view = row.view,
                tags = %row.tags,
                value = row.data.scalar(),
                "metric"
            );
        }
    }
}

/// Hand a snapshot to `reporter` every `interval` until `ctx` is cancelled.
pub fn spawn_reporting(
    metrics: Metrics,
    reporter: Arc<dyn Reporter>,
    interval: Duration,
    ctx: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => reporter.report(&metrics.snapshot()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measures::HEADS;
    use crate::TagSet;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<usize>>);

    impl Reporter for Capture {
        fn report(&self, snapshot: &[ViewData]) {
            self.0.lock().push(snapshot.len());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_until_cancelled() {
        let metrics = Metrics::with_default_views();
        metrics.increment(&HEADS, &TagSet::new());
        let capture = Arc::new(Capture::default());
        let ctx = CancellationToken::new();
        let handle = spawn_reporting(
            metrics,
            capture.clone(),
            Duration::from_secs(10),
            ctx.clone(),
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        ctx.cancel();
        handle.await.unwrap();
        assert_eq!(*capture.0.lock(), vec![1, 1]);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = Metrics::with_default_views();
        metrics.increment(&HEADS, &TagSet::new());
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"view\":\"heads\""));
    }
}
