use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::application::Application;
use crate::pipeline::graph;
use crate::queue::{Task, PRIORITY_INDEX};

use super::handlers::{HandlerRegistry, OutcomeStatus};

/// How long a worker sleeps between claim attempts when the queue looks
/// empty and no wakeup arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long in-flight handlers get to finish after shutdown is requested.
const DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// A fixed set of claim-dispatch loops over the task queue. Panics in
/// handlers are contained per task; completed and failed tasks both leave
/// the queue so nothing wedges.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    app: Application,
}

impl WorkerPool {
    pub fn start(app: Application, workers: usize) -> Self {
        let registry = Arc::new(HandlerRegistry::full());
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let app = app.clone();
                let registry = registry.clone();
                let cancel = cancel.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, app, registry, cancel, in_flight).await;
                })
            })
            .collect();

        Self {
            handles,
            cancel,
            in_flight,
            app,
        }
    }

    /// Resolve once the queue is empty and nothing is being processed.
    /// Used by tests and by drain-style library calls.
    pub async fn wait_idle(&self) {
        loop {
            let pending = self.app.queue.count().await.unwrap_or(0);
            if pending == 0 && self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop claiming, give in-flight handlers a bounded drain window, then
    /// abort whatever is left.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        let drain = async {
            for handle in self.handles {
                _ = handle.await;
            }
        };

        if tokio::time::timeout(DRAIN_WINDOW, drain).await.is_err() {
            warn!("drain window elapsed, detaching remaining workers");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    app: Application,
    registry: Arc<HandlerRegistry>,
    cancel: CancellationToken,
    in_flight: Arc<AtomicUsize>,
) {
    debug!(worker_id, "worker started");
    let wakeup = app.queue.wakeup();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let claimed = match app.queue.claim(1).await {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(worker_id, ?err, "claim failed");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let Some(task) = claimed.into_iter().next() else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wakeup.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        };

        in_flight.fetch_add(1, Ordering::SeqCst);
        process_task(&app, &registry, task, &cancel).await;
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(worker_id, "worker stopped");
}

async fn process_task(
    app: &Application,
    registry: &HandlerRegistry,
    task: Task,
    cancel: &CancellationToken,
) {
    let trackable = task
        .payload
        .repository_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    let tracker = app.tracker_hub.tracker(task.operation, trackable);
    tracker.start().await;

    let Some(handler) = registry.get(task.operation) else {
        // nothing can process this task, and retrying blindly would spin
        error!(task = task.id, operation = %task.operation, "no handler registered");
        tracker.fail("no handler registered for operation").await;
        _ = app.queue.complete(task.id).await;
        return;
    };

    let run = AssertUnwindSafe(handler.run(app, &task.payload, &tracker, cancel)).catch_unwind();

    match run.await {
        Ok(Ok(outcome)) => {
            match &outcome.status {
                OutcomeStatus::Completed => tracker.complete().await,
                OutcomeStatus::Skipped(reason) => tracker.skip(reason.clone()).await,
            }

            let successors = graph::successors(task.operation);
            if !successors.is_empty() && !outcome.halt {
                let next_payload = outcome
                    .next_payload
                    .unwrap_or_else(|| task.payload.clone());
                if let Err(err) = app
                    .queue
                    .enqueue(successors, PRIORITY_INDEX, &next_payload)
                    .await
                {
                    warn!(task = task.id, ?err, "failed to enqueue successors");
                }
            }

            _ = app.queue.complete(task.id).await;
        }
        Ok(Err(err)) => {
            warn!(task = task.id, operation = %task.operation, error = %format!("{err:#}"), "handler failed");
            tracker.fail(format!("{err:#}")).await;
            _ = app.queue.fail(task.id).await;
        }
        Err(_panic) => {
            error!(task = task.id, operation = %task.operation, "handler panicked");
            tracker.fail("handler panicked").await;
            _ = app.queue.fail(task.id).await;
        }
    }
}
