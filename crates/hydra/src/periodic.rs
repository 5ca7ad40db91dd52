//! Periodic background tasks.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

pub type TaskFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named job run every `interval`.
#[derive(Clone)]
pub struct PeriodicTask {
    pub name: &'static str,
    pub interval: Duration,
    pub run: TaskFn,
}

impl PeriodicTask {
    pub fn new<F>(name: &'static str, interval: Duration, run: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            run: Arc::new(run),
        }
    }
}

/// Run each task on its own strand until `ctx` is cancelled.
///
/// A strand sleeps `interval`, runs its task, and sleeps again, so the first
/// run happens one interval after scheduling and runs never overlap. Errors
/// are logged and do not stop the strand.
pub fn schedule(ctx: &CancellationToken, tasks: Vec<PeriodicTask>) -> Vec<JoinHandle<()>> {
    tasks
        .into_iter()
        .map(|task| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(task.interval) => {}
                    }
                    if let Err(e) = (task.run)(ctx.clone()).await {
                        warn!(task = task.name, error = %e, "periodic task failed");
                    }
                }
                debug!(task = task.name, "periodic task stopped");
            })
        })
        .collect()
}
